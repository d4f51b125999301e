use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
  #[default]
  Active,
  Suspended,
  Archived,
}

impl std::fmt::Display for ProjectStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Active => write!(f, "active"),
      Self::Suspended => write!(f, "suspended"),
      Self::Archived => write!(f, "archived"),
    }
  }
}

impl std::str::FromStr for ProjectStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "active" => Ok(Self::Active),
      "suspended" => Ok(Self::Suspended),
      "archived" => Ok(Self::Archived),
      _ => Err(format!("Unknown project status: {}", s)),
    }
  }
}

/// A tenant. Its documents live in a database of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  pub name: String,
  pub status: ProjectStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
