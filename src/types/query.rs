use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Document;
use crate::db::SqlSanitizeError;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
  Asc,
  #[default]
  Desc,
}

impl OrderDirection {
  pub fn as_sql(&self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

impl std::str::FromStr for OrderDirection {
  type Err = SqlSanitizeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "asc" => Ok(Self::Asc),
      "desc" => Ok(Self::Desc),
      _ => Err(SqlSanitizeError::InvalidOrderDirection(s.to_string())),
    }
  }
}

/// Paging, ordering and equality filters for `DocumentStore::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOptions {
  #[serde(default = "default_list_limit")]
  pub limit: usize,
  #[serde(default)]
  pub offset: usize,
  #[serde(default = "default_order_by", rename = "orderBy")]
  pub order_by: String,
  #[serde(default)]
  pub order: OrderDirection,
  /// Field path to expected value; all entries must match.
  #[serde(default, rename = "where")]
  pub filter: BTreeMap<String, serde_json::Value>,
}

fn default_list_limit() -> usize {
  DEFAULT_LIST_LIMIT
}

fn default_order_by() -> String {
  "created_at".into()
}

impl Default for ListOptions {
  fn default() -> Self {
    Self {
      limit: default_list_limit(),
      offset: 0,
      order_by: default_order_by(),
      order: OrderDirection::default(),
      filter: BTreeMap::new(),
    }
  }
}

impl ListOptions {
  pub fn page(limit: usize, offset: usize) -> Self {
    Self {
      limit,
      offset,
      ..Default::default()
    }
  }

  pub fn order_by(mut self, field: impl Into<String>, order: OrderDirection) -> Self {
    self.order_by = field.into();
    self.order = order;
    self
  }

  pub fn filter(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
    self.filter.insert(field.into(), value);
    self
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchOptions {
  #[serde(default = "default_search_limit")]
  pub limit: usize,
  #[serde(default)]
  pub offset: usize,
}

fn default_search_limit() -> usize {
  DEFAULT_SEARCH_LIMIT
}

impl Default for SearchOptions {
  fn default() -> Self {
    Self {
      limit: default_search_limit(),
      offset: 0,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentPage {
  pub documents: Vec<Document>,
  /// Matching documents before paging.
  pub total: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn list_options_defaults() {
    let opts = ListOptions::default();
    assert_eq!(opts.limit, 100);
    assert_eq!(opts.offset, 0);
    assert_eq!(opts.order_by, "created_at");
    assert_eq!(opts.order, OrderDirection::Desc);
    assert!(opts.filter.is_empty());
  }

  #[test]
  fn deserialize_request_style_options() {
    let json = r#"{"limit": 10, "orderBy": "priority", "order": "asc", "where": {"status": "open"}}"#;
    let opts: ListOptions = serde_json::from_str(json).unwrap();
    assert_eq!(opts.limit, 10);
    assert_eq!(opts.offset, 0);
    assert_eq!(opts.order_by, "priority");
    assert_eq!(opts.order, OrderDirection::Asc);
    assert_eq!(opts.filter["status"], "open");
  }

  #[test]
  fn parse_order_direction() {
    assert_eq!("ASC".parse::<OrderDirection>().unwrap(), OrderDirection::Asc);
    assert_eq!("desc".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
    assert!("sideways".parse::<OrderDirection>().is_err());
  }
}
