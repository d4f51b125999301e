use std::sync::Arc;

use chrono::Duration;
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::filter::{OrderKey, Predicate};
use crate::collections::CollectionResolver;
use crate::db::row::{format_timestamp, json_at, now, timestamp_at, uuid_at};
use crate::db::sanitize::validate_limit;
use crate::db::{query_rows, DatabaseRegistry};
use crate::error::{Operation, StoreError};
use crate::types::{Collection, Document, DocumentPage, ListOptions, SearchOptions};

const DOCUMENT_COLUMNS: &str =
  "id, collection_id, project_id, data, created_by, updated_by, created_at, updated_at";

const DEFAULT_ACTOR: &str = "system";

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
  Ok(Document {
    id: uuid_at(row, 0)?,
    collection_id: uuid_at(row, 1)?,
    project_id: row.get(2)?,
    data: json_at(row, 3)?,
    created_by: row.get(4)?,
    updated_by: row.get(5)?,
    created_at: timestamp_at(row, 6)?,
    updated_at: timestamp_at(row, 7)?,
  })
}

fn select_by_id(conn: &rusqlite::Connection, id: &str, collection_id: &str) -> Result<Option<Document>, StoreError> {
  let sql = format!(
    "SELECT {} FROM documents WHERE id = ?1 AND collection_id = ?2",
    DOCUMENT_COLUMNS
  );
  conn
    .query_row(&sql, [id, collection_id], row_to_document)
    .optional()
    .map_err(|e| StoreError::query(&sql, e))
}

fn require_object(data: &serde_json::Value) -> Result<(), StoreError> {
  if data.is_object() {
    Ok(())
  } else {
    Err(StoreError::InvalidDocument(format!(
      "document data must be a JSON object, got {}",
      json_kind(data)
    )))
  }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
  match value {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "a boolean",
    serde_json::Value::Number(_) => "a number",
    serde_json::Value::String(_) => "a string",
    serde_json::Value::Array(_) => "an array",
    serde_json::Value::Object(_) => "an object",
  }
}

/// Schema-less CRUD over the `documents` table of each project database.
///
/// Every call resolves the collection first. Read paths (`get`, `list`,
/// `search`, `count`, `delete`) treat an unknown collection as empty; write
/// paths (`create`, `update`) fail with `CollectionNotFound`.
pub struct DocumentStore {
  registry: Arc<DatabaseRegistry>,
  resolver: Arc<CollectionResolver>,
}

impl DocumentStore {
  pub fn new(registry: Arc<DatabaseRegistry>, resolver: Arc<CollectionResolver>) -> Self {
    Self { registry, resolver }
  }

  /// Resolves the collection, mapping `CollectionNotFound` to `None` for read paths.
  async fn resolve_for_read(
    &self,
    project_id: &str,
    collection: &str,
    operation: Operation,
  ) -> Result<Option<Collection>, StoreError> {
    match self.resolver.resolve(project_id, collection, operation).await {
      Ok(c) => Ok(Some(c)),
      Err(e) if e.is_collection_not_found() => {
        tracing::warn!(project_id, collection, %operation, "{}", e);
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  pub async fn create(
    &self,
    project_id: &str,
    collection: &str,
    data: serde_json::Value,
    created_by: Option<&str>,
  ) -> Result<Document, StoreError> {
    self
      .create_inner(project_id, collection, data, created_by)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Create))
  }

  async fn create_inner(
    &self,
    project_id: &str,
    collection: &str,
    data: serde_json::Value,
    created_by: Option<&str>,
  ) -> Result<Document, StoreError> {
    self.registry.ensure_ready().await?;
    require_object(&data)?;
    let target = self.resolver.resolve(project_id, collection, Operation::Create).await?;
    let db = self.registry.project(project_id).await?;

    let id = Uuid::new_v4().to_string();
    let collection_id = target.id.to_string();
    let project = project_id.to_string();
    let actor = created_by.unwrap_or(DEFAULT_ACTOR).to_string();
    let stamp = format_timestamp(&now());
    let body = serde_json::to_string(&data)?;

    let created = db
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO documents (id, collection_id, project_id, data, created_by, updated_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?6)",
            rusqlite::params![id, collection_id, project, body, actor, stamp],
          )
          .map_err(|e| StoreError::query("INSERT INTO documents", e))?;
        select_by_id(conn, &id, &collection_id)
      })
      .await?;

    match created {
      Some(doc) => {
        tracing::debug!(project_id, collection = %target.name, id = %doc.id, "Created document");
        Ok(doc)
      }
      None => Err(StoreError::DocumentCreateFailed {
        project_id: project_id.to_string(),
        collection: target.name,
      }),
    }
  }

  /// Missing collection and missing document both yield `None`.
  pub async fn get(&self, project_id: &str, collection: &str, id: Uuid) -> Result<Option<Document>, StoreError> {
    self
      .get_inner(project_id, collection, id)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Get))
  }

  async fn get_inner(&self, project_id: &str, collection: &str, id: Uuid) -> Result<Option<Document>, StoreError> {
    self.registry.ensure_ready().await?;
    let Some(target) = self.resolve_for_read(project_id, collection, Operation::Get).await? else {
      return Ok(None);
    };
    let db = self.registry.project(project_id).await?;
    let collection_id = target.id.to_string();
    db.call(move |conn| select_by_id(conn, &id.to_string(), &collection_id))
      .await
  }

  pub async fn list(&self, project_id: &str, collection: &str, options: &ListOptions) -> Result<DocumentPage, StoreError> {
    self
      .list_inner(project_id, collection, options)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::List))
  }

  async fn list_inner(&self, project_id: &str, collection: &str, options: &ListOptions) -> Result<DocumentPage, StoreError> {
    self.registry.ensure_ready().await?;
    validate_limit(options.limit)?;
    let order = OrderKey::parse(&options.order_by)?;

    let Some(target) = self.resolve_for_read(project_id, collection, Operation::List).await? else {
      return Ok(DocumentPage::default());
    };

    let filter = Predicate::for_list(target.id, &options.filter).compile()?;
    let count_sql = format!("SELECT COUNT(*) FROM documents WHERE {}", filter.sql);
    let count_params = filter.params.clone();

    let mut page_params = filter.params;
    let order_sql = order.order_sql(options.order, &mut page_params);
    page_params.extend(page_bounds(options.limit, options.offset));
    let page_sql = format!(
      "SELECT {} FROM documents WHERE {} {} LIMIT ? OFFSET ?",
      DOCUMENT_COLUMNS, filter.sql, order_sql
    );

    let db = self.registry.project(project_id).await?;
    db.call(move |conn| {
      let total = count_rows(conn, &count_sql, &count_params)?;
      let documents =
        query_rows(conn, &page_sql, &page_params, row_to_document).map_err(|e| StoreError::query(&page_sql, e))?;
      Ok(DocumentPage { documents, total })
    })
    .await
  }

  /// Replaces the whole document body. `None` when no document matched.
  pub async fn update(
    &self,
    project_id: &str,
    collection: &str,
    id: Uuid,
    data: serde_json::Value,
    updated_by: Option<&str>,
  ) -> Result<Option<Document>, StoreError> {
    self
      .update_inner(project_id, collection, id, data, updated_by)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Update))
  }

  async fn update_inner(
    &self,
    project_id: &str,
    collection: &str,
    id: Uuid,
    data: serde_json::Value,
    updated_by: Option<&str>,
  ) -> Result<Option<Document>, StoreError> {
    self.registry.ensure_ready().await?;
    require_object(&data)?;
    let target = self.resolver.resolve(project_id, collection, Operation::Update).await?;
    let db = self.registry.project(project_id).await?;

    let id = id.to_string();
    let collection_id = target.id.to_string();
    let actor = updated_by.unwrap_or(DEFAULT_ACTOR).to_string();
    let body = serde_json::to_string(&data)?;

    db.call(move |conn| {
      let Some(previous) = select_by_id(conn, &id, &collection_id)? else {
        return Ok(None);
      };
      // updated_at strictly increases even within one clock tick
      let stamp = now().max(previous.updated_at + Duration::microseconds(1));
      conn
        .execute(
          "UPDATE documents SET data = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4 AND collection_id = ?5",
          rusqlite::params![body, actor, format_timestamp(&stamp), id, collection_id],
        )
        .map_err(|e| StoreError::query("UPDATE documents", e))?;
      select_by_id(conn, &id, &collection_id)
    })
    .await
  }

  /// `true` only when a document was removed.
  pub async fn delete(&self, project_id: &str, collection: &str, id: Uuid) -> Result<bool, StoreError> {
    self
      .delete_inner(project_id, collection, id)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Delete))
  }

  async fn delete_inner(&self, project_id: &str, collection: &str, id: Uuid) -> Result<bool, StoreError> {
    self.registry.ensure_ready().await?;
    let Some(target) = self.resolve_for_read(project_id, collection, Operation::Delete).await? else {
      return Ok(false);
    };
    let db = self.registry.project(project_id).await?;
    let removed = db
      .execute(
        "DELETE FROM documents WHERE id = ?1 AND collection_id = ?2",
        vec![id.to_string().into(), target.id.to_string().into()],
      )
      .await?;
    Ok(removed > 0)
  }

  /// Substring search across `fields`, or across the whole serialized
  /// document when `fields` is empty. Newest first.
  pub async fn search(
    &self,
    project_id: &str,
    collection: &str,
    term: &str,
    fields: &[String],
    options: SearchOptions,
  ) -> Result<Vec<Document>, StoreError> {
    self
      .search_inner(project_id, collection, term, fields, options)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Search))
  }

  async fn search_inner(
    &self,
    project_id: &str,
    collection: &str,
    term: &str,
    fields: &[String],
    options: SearchOptions,
  ) -> Result<Vec<Document>, StoreError> {
    self.registry.ensure_ready().await?;
    validate_limit(options.limit)?;

    let Some(target) = self.resolve_for_read(project_id, collection, Operation::Search).await? else {
      return Ok(Vec::new());
    };

    let filter = Predicate::for_search(target.id, term, fields).compile()?;
    let mut params = filter.params;
    params.extend(page_bounds(options.limit, options.offset));
    let sql = format!(
      "SELECT {} FROM documents WHERE {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
      DOCUMENT_COLUMNS, filter.sql
    );

    let db = self.registry.project(project_id).await?;
    db.query_map(sql, params, row_to_document).await
  }

  pub async fn count(&self, project_id: &str, collection: &str) -> Result<u64, StoreError> {
    self
      .count_inner(project_id, collection)
      .await
      .map_err(|e| e.in_operation(project_id, collection, Operation::Count))
  }

  async fn count_inner(&self, project_id: &str, collection: &str) -> Result<u64, StoreError> {
    self.registry.ensure_ready().await?;
    let Some(target) = self.resolve_for_read(project_id, collection, Operation::Count).await? else {
      return Ok(0);
    };
    let filter = Predicate::CollectionIs(target.id).compile()?;
    let sql = format!("SELECT COUNT(*) FROM documents WHERE {}", filter.sql);
    let db = self.registry.project(project_id).await?;
    db.call(move |conn| count_rows(conn, &sql, &filter.params)).await
  }
}

/// `LIMIT ? OFFSET ?` parameters. Offsets past `i64::MAX` clamp so they stay past the end.
fn page_bounds(limit: usize, offset: usize) -> [Value; 2] {
  let clamp = |n: usize| Value::Integer(i64::try_from(n).unwrap_or(i64::MAX));
  [clamp(limit), clamp(offset)]
}

fn count_rows(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
  let total: Option<i64> = conn
    .query_row(sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))
    .map_err(|e| StoreError::query(sql, e))?;
  Ok(total.unwrap_or(0).max(0) as u64)
}
