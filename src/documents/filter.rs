//! Typed predicates over the `documents` table, compiled to SQL with bound
//! parameters.
//!
//! Field paths are validated and rendered into JSON paths with every segment
//! quoted (`$."a"."b"`), so keys like `first-name` or `due date` work. The
//! paths are themselves bound, so no caller-supplied text is ever spliced
//! into SQL.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::db::sanitize::{escape_like, validate_field_path};
use crate::db::{SqlParams, SqlSanitizeError};
use crate::types::OrderDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  CollectionIs(Uuid),
  /// JSON value at `path` equals `value`.
  FieldEquals { path: String, value: Json },
  /// Text at `path` contains `term` (ASCII case-insensitive).
  FieldContains { path: String, term: String },
  /// The serialized document contains `term`.
  DataContains(String),
  And(Vec<Predicate>),
  Or(Vec<Predicate>),
}

/// A WHERE fragment and the values for its `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
  pub sql: String,
  pub params: SqlParams,
}

fn json_path(field: &str) -> Result<String, SqlSanitizeError> {
  validate_field_path(field)?;
  let mut path = String::from("$");
  for segment in field.split('.') {
    path.push_str(".\"");
    path.push_str(segment);
    path.push('"');
  }
  Ok(path)
}

fn like_pattern(term: &str) -> String {
  format!("%{}%", escape_like(term))
}

impl Predicate {
  /// Collection scope ANDed with one equality test per `where` entry.
  pub fn for_list(collection_id: Uuid, filter: &BTreeMap<String, Json>) -> Self {
    let mut parts = vec![Self::CollectionIs(collection_id)];
    parts.extend(filter.iter().map(|(path, value)| Self::FieldEquals {
      path: path.clone(),
      value: value.clone(),
    }));
    Self::And(parts)
  }

  /// Collection scope ANDed with a substring match ORed across `fields`, or
  /// against the whole document when no fields are given.
  pub fn for_search(collection_id: Uuid, term: &str, fields: &[String]) -> Self {
    let matcher = if fields.is_empty() {
      Self::DataContains(term.to_string())
    } else {
      Self::Or(
        fields
          .iter()
          .map(|path| Self::FieldContains {
            path: path.clone(),
            term: term.to_string(),
          })
          .collect(),
      )
    };
    Self::And(vec![Self::CollectionIs(collection_id), matcher])
  }

  pub fn compile(&self) -> Result<CompiledFilter, SqlSanitizeError> {
    let mut params = Vec::new();
    let sql = self.write_sql(&mut params)?;
    Ok(CompiledFilter { sql, params })
  }

  fn write_sql(&self, params: &mut SqlParams) -> Result<String, SqlSanitizeError> {
    match self {
      Self::CollectionIs(id) => {
        params.push(Value::Text(id.to_string()));
        Ok("collection_id = ?".to_string())
      }
      Self::FieldEquals { path, value } => equals_sql(&json_path(path)?, value, params),
      Self::FieldContains { path, term } => {
        params.push(Value::Text(json_path(path)?));
        params.push(Value::Text(like_pattern(term)));
        Ok("json_extract(data, ?) LIKE ? ESCAPE '\\'".to_string())
      }
      Self::DataContains(term) => {
        params.push(Value::Text(like_pattern(term)));
        Ok("data LIKE ? ESCAPE '\\'".to_string())
      }
      Self::And(parts) => join(parts, " AND ", "1=1", params),
      Self::Or(parts) => join(parts, " OR ", "0=1", params),
    }
  }
}

fn join(parts: &[Predicate], sep: &str, empty: &str, params: &mut SqlParams) -> Result<String, SqlSanitizeError> {
  match parts {
    [] => Ok(empty.to_string()),
    [only] => only.write_sql(params),
    _ => {
      let sql = parts
        .iter()
        .map(|p| p.write_sql(params))
        .collect::<Result<Vec<_>, _>>()?;
      Ok(format!("({})", sql.join(sep)))
    }
  }
}

fn equals_sql(path: &str, value: &Json, params: &mut SqlParams) -> Result<String, SqlSanitizeError> {
  params.push(Value::Text(path.to_string()));
  match value {
    Json::Null => Ok("json_type(data, ?) = 'null'".to_string()),
    Json::Bool(true) => Ok("json_type(data, ?) = 'true'".to_string()),
    Json::Bool(false) => Ok("json_type(data, ?) = 'false'".to_string()),
    Json::Number(n) => {
      params.push(match n.as_i64() {
        Some(i) => Value::Integer(i),
        None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
      });
      Ok("json_extract(data, ?) = ?".to_string())
    }
    Json::String(s) => {
      params.push(Value::Text(s.clone()));
      Ok("json_extract(data, ?) = ?".to_string())
    }
    Json::Array(_) | Json::Object(_) => {
      params.push(Value::Text(value.to_string()));
      Ok("json_extract(data, ?) = json(?)".to_string())
    }
  }
}

/// Sort key for `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
  /// A real column of the documents table.
  Column(&'static str),
  /// A JSON field compared as a number.
  Numeric(String),
  /// A JSON field compared as extracted text.
  Text(String),
}

const NUMERIC_FIELDS: &[&str] = &["priority", "score", "rating", "count"];

impl OrderKey {
  pub fn parse(field: &str) -> Result<Self, SqlSanitizeError> {
    match field {
      "created_at" => Ok(Self::Column("created_at")),
      "updated_at" => Ok(Self::Column("updated_at")),
      "id" => Ok(Self::Column("id")),
      f if NUMERIC_FIELDS.contains(&f) => Ok(Self::Numeric(json_path(f)?)),
      f => Ok(Self::Text(json_path(f)?)),
    }
  }

  /// `ORDER BY` clause. Ties fall back to insertion order in the same direction.
  pub fn order_sql(&self, direction: OrderDirection, params: &mut SqlParams) -> String {
    let dir = direction.as_sql();
    let expr = match self {
      Self::Column(column) => column.to_string(),
      Self::Numeric(path) => {
        params.push(Value::Text(path.clone()));
        "CAST(json_extract(data, ?) AS REAL)".to_string()
      }
      Self::Text(path) => {
        params.push(Value::Text(path.clone()));
        "json_extract(data, ?)".to_string()
      }
    };
    format!("ORDER BY {} {}, rowid {}", expr, dir, dir)
  }
}
