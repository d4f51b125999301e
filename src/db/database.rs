use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value;
use tokio_rusqlite::Connection;

use super::row::value_ref_to_json;
use crate::error::StoreError;

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;
"#;

/// Positional parameters bound to `?` placeholders in order.
pub type SqlParams = Vec<Value>;

/// A result row keyed by column name.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Handle to one SQLite database (the main database or a single project's).
///
/// Cloning is cheap and every clone talks to the same connection, whose
/// statements run one at a time on the connection's worker.
#[derive(Clone)]
pub struct Database {
  inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
  label: String,
  conn: Connection,
}

impl std::fmt::Debug for Database {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Database").field("label", &self.inner.label).finish()
  }
}

impl Database {
  /// Opens a file-backed database, or a private in-memory one when `path` is `None`.
  pub(crate) async fn open(label: impl Into<String>, path: Option<&Path>) -> Result<Self, StoreError> {
    let label = label.into();
    let conn = match path {
      Some(p) => Connection::open(p).await,
      None => Connection::open_in_memory().await,
    }
    .map_err(|source| StoreError::Connection {
      target: label.clone(),
      source,
    })?;

    conn
      .call(|conn| conn.execute_batch(PRAGMAS).map_err(|e| e.into()))
      .await
      .map_err(|source| StoreError::Connection {
        target: label.clone(),
        source,
      })?;

    Ok(Self {
      inner: Arc::new(DatabaseInner { label, conn }),
    })
  }

  pub fn label(&self) -> &str {
    &self.inner.label
  }

  /// True when both handles share one connection.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Runs `f` on the connection. Everything inside one call executes without
  /// interleaving with other statements on this database.
  pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
  {
    self.inner.conn.call(move |conn| Ok(f(conn))).await?
  }

  pub async fn execute(&self, sql: impl Into<String>, params: SqlParams) -> Result<usize, StoreError> {
    let sql = sql.into();
    self
      .call(move |conn| {
        conn
          .execute(&sql, rusqlite::params_from_iter(params.iter()))
          .map_err(|e| StoreError::query(&sql, e))
      })
      .await
  }

  pub async fn query_map<T, F>(
    &self,
    sql: impl Into<String>,
    params: SqlParams,
    map: F,
  ) -> Result<Vec<T>, StoreError>
  where
    T: Send + 'static,
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
  {
    let sql = sql.into();
    self
      .call(move |conn| query_rows(conn, &sql, &params, map).map_err(|e| StoreError::query(&sql, e)))
      .await
  }

  pub async fn query_json(&self, sql: impl Into<String>, params: SqlParams) -> Result<Vec<JsonRow>, StoreError> {
    self.query_map(sql, params, row_to_json).await
  }
}

pub(crate) fn query_rows<T, F>(
  conn: &rusqlite::Connection,
  sql: &str,
  params: &[Value],
  mut map: F,
) -> rusqlite::Result<Vec<T>>
where
  F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
  let mut stmt = conn.prepare_cached(sql)?;
  let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
  let mut out = Vec::new();
  while let Some(row) = rows.next()? {
    out.push(map(row)?);
  }
  Ok(out)
}

fn row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<JsonRow> {
  let stmt = row.as_ref();
  let mut out = JsonRow::new();
  for idx in 0..stmt.column_count() {
    let name = stmt.column_name(idx)?.to_string();
    out.insert(name, value_ref_to_json(row.get_ref(idx)?));
  }
  Ok(out)
}
