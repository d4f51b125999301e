//! Maps caller-supplied collection identifiers to canonical collection rows.
//!
//! Callers may pass a collection id, a URL-encoded name, or a name typed in
//! a different case. Each interpretation is a [`LookupStrategy`]; the
//! resolver tries them in order and stops at the first hit. Every lookup is
//! scoped to one project.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::db::row::{format_timestamp, json_at, now, timestamp_at, uuid_at};
use crate::db::{Database, DatabaseRegistry};
use crate::error::{Operation, StoreError};
use crate::types::Collection;

const COLLECTION_COLUMNS: &str = "id, project_id, name, description, schema, created_at, updated_at";

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
  Ok(Collection {
    id: uuid_at(row, 0)?,
    project_id: row.get(1)?,
    name: row.get(2)?,
    description: row.get(3)?,
    schema: json_at(row, 4)?,
    created_at: timestamp_at(row, 5)?,
    updated_at: timestamp_at(row, 6)?,
  })
}

static UUID_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn looks_like_uuid(input: &str) -> bool {
  UUID_PATTERN
    .get_or_init(|| {
      Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
    })
    .as_ref()
    .map(|re| re.is_match(input))
    .unwrap_or(false)
}

/// Percent-decoded and trimmed input. Malformed encodings fall back to the raw text.
pub fn normalize_name(input: &str) -> String {
  match urlencoding::decode(input) {
    Ok(decoded) => decoded.trim().to_string(),
    Err(_) => input.trim().to_string(),
  }
}

/// What a strategy is asked to resolve.
#[derive(Debug, Clone, Copy)]
pub struct LookupRequest<'a> {
  pub project_id: &'a str,
  pub input: &'a str,
  pub operation: Operation,
}

/// One way of interpreting a collection identifier.
#[async_trait]
pub trait LookupStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  /// `Ok(None)` hands the input to the next strategy.
  async fn lookup(&self, db: &Database, request: LookupRequest<'_>) -> Result<Option<Collection>, StoreError>;
}

/// Input shaped like a UUID is matched against collection ids, undecoded.
pub struct ById;

#[async_trait]
impl LookupStrategy for ById {
  fn name(&self) -> &'static str {
    "id"
  }

  async fn lookup(&self, db: &Database, request: LookupRequest<'_>) -> Result<Option<Collection>, StoreError> {
    if !looks_like_uuid(request.input) {
      return Ok(None);
    }
    let id = match Uuid::parse_str(request.input) {
      Ok(id) => id,
      Err(_) => return Ok(None),
    };
    find_one(
      db,
      format!(
        "SELECT {} FROM collections WHERE id = ?1 AND project_id = ?2",
        COLLECTION_COLUMNS
      ),
      id.to_string(),
      request.project_id.to_string(),
    )
    .await
  }
}

/// Exact match on the decoded, trimmed name.
pub struct ByDecodedName;

#[async_trait]
impl LookupStrategy for ByDecodedName {
  fn name(&self) -> &'static str {
    "name"
  }

  async fn lookup(&self, db: &Database, request: LookupRequest<'_>) -> Result<Option<Collection>, StoreError> {
    let name = normalize_name(request.input);
    if name.is_empty() {
      return Ok(None);
    }
    find_by_name(db, request.project_id, name).await
  }
}

/// Case-insensitive match over every collection name in the project. The hit
/// is re-read by its stored name so the canonical spelling is returned.
pub struct ByCaseInsensitiveName;

#[async_trait]
impl LookupStrategy for ByCaseInsensitiveName {
  fn name(&self) -> &'static str {
    "case-insensitive name"
  }

  async fn lookup(&self, db: &Database, request: LookupRequest<'_>) -> Result<Option<Collection>, StoreError> {
    let LookupRequest {
      project_id,
      input,
      operation,
    } = request;
    let wanted = normalize_name(input).to_lowercase();
    if wanted.is_empty() {
      return Ok(None);
    }

    let names = collection_names(db, project_id).await?;
    let mut matches: Vec<String> = names.into_iter().filter(|n| n.to_lowercase() == wanted).collect();

    match matches.len() {
      0 => Ok(None),
      1 => {
        let stored = matches.remove(0);
        find_by_name(db, project_id, stored).await
      }
      _ => Err(StoreError::AmbiguousCollection {
        project_id: project_id.to_string(),
        collection: input.to_string(),
        operation,
        candidates: matches,
      }),
    }
  }
}

async fn find_one(db: &Database, sql: String, key: String, project_id: String) -> Result<Option<Collection>, StoreError> {
  db.call(move |conn| {
    conn
      .query_row(&sql, [&key, &project_id], row_to_collection)
      .optional()
      .map_err(|e| StoreError::query(&sql, e))
  })
  .await
}

async fn find_by_name(db: &Database, project_id: &str, name: String) -> Result<Option<Collection>, StoreError> {
  find_one(
    db,
    format!(
      "SELECT {} FROM collections WHERE name = ?1 AND project_id = ?2",
      COLLECTION_COLUMNS
    ),
    name,
    project_id.to_string(),
  )
  .await
}

async fn collection_names(db: &Database, project_id: &str) -> Result<Vec<String>, StoreError> {
  db.query_map(
    "SELECT name FROM collections WHERE project_id = ?1 ORDER BY name",
    vec![project_id.to_string().into()],
    |row| row.get::<_, String>(0),
  )
  .await
}

pub struct CollectionResolver {
  registry: Arc<DatabaseRegistry>,
  strategies: Vec<Box<dyn LookupStrategy>>,
}

impl CollectionResolver {
  pub fn new(registry: Arc<DatabaseRegistry>) -> Self {
    Self::with_strategies(
      registry,
      vec![Box::new(ById), Box::new(ByDecodedName), Box::new(ByCaseInsensitiveName)],
    )
  }

  pub fn with_strategies(registry: Arc<DatabaseRegistry>, strategies: Vec<Box<dyn LookupStrategy>>) -> Self {
    Self { registry, strategies }
  }

  pub fn registry(&self) -> &Arc<DatabaseRegistry> {
    &self.registry
  }

  /// Resolves `input` to one collection of `project_id` or fails with
  /// `CollectionNotFound` naming every collection the project has. Both
  /// failures carry `operation`.
  pub async fn resolve(&self, project_id: &str, input: &str, operation: Operation) -> Result<Collection, StoreError> {
    let db = self.registry.project(project_id).await?;
    let request = LookupRequest {
      project_id,
      input,
      operation,
    };

    for strategy in &self.strategies {
      if let Some(collection) = strategy.lookup(&db, request).await? {
        tracing::debug!(
          project_id,
          input,
          canonical = %collection.name,
          strategy = strategy.name(),
          "Resolved collection"
        );
        return Ok(collection);
      }
    }

    let available = collection_names(&db, project_id).await?;
    tracing::debug!(project_id, input, %operation, "Collection not found");
    Err(StoreError::CollectionNotFound {
      project_id: project_id.to_string(),
      collection: input.to_string(),
      operation,
      available,
    })
  }

  /// Registers a collection under its trimmed name.
  pub async fn create_collection(
    &self,
    project_id: &str,
    name: &str,
    schema: serde_json::Value,
  ) -> Result<Collection, StoreError> {
    let name = name.trim();
    if name.is_empty() {
      return Err(StoreError::InvalidIdentifier(crate::db::SqlSanitizeError::EmptyIdentifier));
    }

    let ts = now();
    let collection = Collection {
      id: Uuid::new_v4(),
      project_id: project_id.to_string(),
      name: name.to_string(),
      description: None,
      schema,
      created_at: ts,
      updated_at: ts,
    };

    let db = self.registry.project(project_id).await?;
    let row = collection.clone();
    db.call(move |conn| {
      let stamp = format_timestamp(&row.created_at);
      let inserted = conn
        .execute(
          "INSERT OR IGNORE INTO collections (id, project_id, name, description, schema, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![
            row.id.to_string(),
            row.project_id,
            row.name,
            row.description,
            row.schema.to_string(),
            stamp
          ],
        )
        .map_err(|e| StoreError::query("INSERT INTO collections", e))?;
      if inserted == 0 {
        return Err(StoreError::CollectionExists {
          project_id: row.project_id,
          name: row.name,
        });
      }
      Ok(())
    })
    .await?;

    tracing::info!(project_id, collection = name, "Created collection");
    Ok(collection)
  }

  pub async fn list_collections(&self, project_id: &str) -> Result<Vec<Collection>, StoreError> {
    let db = self.registry.project(project_id).await?;
    db.query_map(
      format!(
        "SELECT {} FROM collections WHERE project_id = ?1 ORDER BY name",
        COLLECTION_COLUMNS
      ),
      vec![project_id.to_string().into()],
      row_to_collection,
    )
    .await
  }
}
