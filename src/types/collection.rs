use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named bucket of documents within one project. `name` is the canonical
/// stored name; callers' spellings are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
  pub id: Uuid,
  pub project_id: String,
  pub name: String,
  pub description: Option<String>,
  pub schema: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
