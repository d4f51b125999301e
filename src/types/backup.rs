use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
  Project,
  System,
}

impl std::fmt::Display for BackupKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Project => write!(f, "project"),
      Self::System => write!(f, "system"),
    }
  }
}

impl std::str::FromStr for BackupKind {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "project" => Ok(Self::Project),
      "system" => Ok(Self::System),
      _ => Err(format!("Unknown backup type: {}", s)),
    }
  }
}

/// `Creating -> Ready` on success, `Creating -> Failed` on any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
  Creating,
  Ready,
  Failed,
}

impl std::fmt::Display for BackupStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Creating => write!(f, "creating"),
      Self::Ready => write!(f, "ready"),
      Self::Failed => write!(f, "failed"),
    }
  }
}

impl std::str::FromStr for BackupStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "creating" => Ok(Self::Creating),
      "ready" => Ok(Self::Ready),
      "failed" => Ok(Self::Failed),
      _ => Err(format!("Unknown backup status: {}", s)),
    }
  }
}

/// Backup metadata as recorded in the main database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
  pub id: Uuid,
  pub kind: BackupKind,
  pub project_id: Option<String>,
  pub status: BackupStatus,
  pub description: Option<String>,
  pub size: u64,
  pub encrypted: bool,
  pub archive_version: u16,
  pub checksum: Option<String>,
  pub location: String,
  pub created_at: DateTime<Utc>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
  pub description: Option<String>,
  /// Generated when absent.
  pub password: Option<String>,
}

impl BackupOptions {
  pub fn with_password(password: impl Into<String>) -> Self {
    Self {
      description: None,
      password: Some(password.into()),
    }
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

/// Result of a successful backup. `password` is only set when the engine
/// generated it; it is not stored anywhere and cannot be recovered later.
pub struct BackupCreated {
  pub backup: Backup,
  pub password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for BackupCreated {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BackupCreated")
      .field("backup", &self.backup)
      .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
      .finish()
  }
}

#[derive(Clone)]
pub struct RestoreOptions {
  pub password: Zeroizing<String>,
  pub overwrite: bool,
}

impl RestoreOptions {
  pub fn new(password: impl Into<String>) -> Self {
    Self {
      password: Zeroizing::new(password.into()),
      overwrite: false,
    }
  }

  pub fn overwrite(mut self, overwrite: bool) -> Self {
    self.overwrite = overwrite;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
  pub backup_id: Uuid,
  pub project_id: String,
  pub tables: usize,
  pub rows: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backup_created_debug_redacts_password() {
    let created = BackupCreated {
      backup: Backup {
        id: Uuid::nil(),
        kind: BackupKind::Project,
        project_id: Some("p1".into()),
        status: BackupStatus::Ready,
        description: None,
        size: 0,
        encrypted: true,
        archive_version: 1,
        checksum: None,
        location: "/tmp/x".into(),
        created_at: Utc::now(),
        error: None,
      },
      password: Some(Zeroizing::new("hunter2".into())),
    };
    let debug = format!("{:?}", created);
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("[REDACTED]"));
  }

  #[test]
  fn parse_kind_and_status() {
    assert_eq!("System".parse::<BackupKind>().unwrap(), BackupKind::System);
    assert_eq!("ready".parse::<BackupStatus>().unwrap(), BackupStatus::Ready);
    assert!("partial".parse::<BackupStatus>().is_err());
  }
}
