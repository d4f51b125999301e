use std::fmt;

use uuid::Uuid;

use crate::backup::ArchiveError;
use crate::db::SqlSanitizeError;
use crate::types::BackupStatus;

/// The operation a document-store call was performing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Create,
  Get,
  List,
  Update,
  Delete,
  Search,
  Count,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Create => write!(f, "create"),
      Self::Get => write!(f, "get"),
      Self::List => write!(f, "list"),
      Self::Update => write!(f, "update"),
      Self::Delete => write!(f, "delete"),
      Self::Search => write!(f, "search"),
      Self::Count => write!(f, "count"),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("failed to open database '{target}': {source}")]
  Connection {
    target: String,
    #[source]
    source: tokio_rusqlite::Error,
  },

  #[error("statement failed: {source} [{statement}]")]
  Query {
    statement: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error(transparent)]
  Database(#[from] tokio_rusqlite::Error),

  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  #[error(transparent)]
  InvalidIdentifier(#[from] SqlSanitizeError),

  #[error(
    "collection '{collection}' not found in project '{project_id}' ({operation}); available collections: {}",
    format_names(.available)
  )]
  CollectionNotFound {
    project_id: String,
    collection: String,
    operation: Operation,
    available: Vec<String>,
  },

  #[error(
    "collection '{collection}' is ambiguous in project '{project_id}' ({operation}); candidates: {}",
    format_names(.candidates)
  )]
  AmbiguousCollection {
    project_id: String,
    collection: String,
    operation: Operation,
    candidates: Vec<String>,
  },

  #[error("project '{0}' already exists")]
  ProjectExists(String),

  #[error("project '{0}' not found")]
  ProjectNotFound(String),

  #[error("collection '{name}' already exists in project '{project_id}'")]
  CollectionExists { project_id: String, name: String },

  #[error("{operation} on '{project_id}/{collection}' failed: {source}")]
  Document {
    project_id: String,
    collection: String,
    operation: Operation,
    #[source]
    source: Box<StoreError>,
  },

  #[error("document in '{project_id}/{collection}' was not readable after insert")]
  DocumentCreateFailed { project_id: String, collection: String },

  #[error("invalid document: {0}")]
  InvalidDocument(String),

  #[error("schema drift in {database}: {}", format_names(.missing))]
  SchemaDrift { database: String, missing: Vec<String> },

  #[error("project '{project_id}' already contains data; restore with overwrite to replace it")]
  RestoreConflict { project_id: String },

  #[error("invalid backup password")]
  InvalidPassword,

  #[error("archive version {found} is newer than supported version {supported}")]
  UnsupportedArchiveVersion { found: u16, supported: u16 },

  #[error(transparent)]
  Archive(ArchiveError),

  #[error("backup {backup_id} of {}: {source}", .project_id.as_deref().unwrap_or("system"))]
  Backup {
    backup_id: Uuid,
    project_id: Option<String>,
    #[source]
    source: Box<StoreError>,
  },

  #[error("backup {0} not found")]
  BackupNotFound(Uuid),

  #[error("backup {id} is {status} and cannot be restored")]
  BackupNotReady { id: Uuid, status: BackupStatus },

  #[error("backup {id} cannot be restored here: {reason}")]
  InvalidRestoreTarget { id: Uuid, reason: String },

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Config(#[from] serde_yaml::Error),
}

impl StoreError {
  pub(crate) fn query(statement: &str, source: rusqlite::Error) -> Self {
    Self::Query {
      statement: statement.to_string(),
      source,
    }
  }

  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    Self::Io {
      context: context.into(),
      source,
    }
  }

  /// True for resolution failures that read paths report as "nothing here yet".
  pub fn is_collection_not_found(&self) -> bool {
    matches!(self, Self::CollectionNotFound { .. })
  }

  /// Attach tenant, collection and operation to an error raised below the document store.
  pub(crate) fn in_operation(self, project_id: &str, collection: &str, operation: Operation) -> Self {
    match self {
      Self::CollectionNotFound { .. }
      | Self::AmbiguousCollection { .. }
      | Self::Document { .. }
      | Self::DocumentCreateFailed { .. } => self,
      other => Self::Document {
        project_id: project_id.to_string(),
        collection: collection.to_string(),
        operation,
        source: Box::new(other),
      },
    }
  }

  /// Attach the backup and its project to an error raised while writing or
  /// reading an archive. Errors that already name the backup pass through.
  pub(crate) fn in_backup(self, backup_id: Uuid, project_id: Option<&str>) -> Self {
    match self {
      Self::BackupNotFound(_)
      | Self::BackupNotReady { .. }
      | Self::InvalidRestoreTarget { .. }
      | Self::RestoreConflict { .. }
      | Self::Backup { .. } => self,
      other => Self::Backup {
        backup_id,
        project_id: project_id.map(str::to_string),
        source: Box::new(other),
      },
    }
  }

  /// The error beneath any document or backup context.
  pub fn root_cause(&self) -> &StoreError {
    match self {
      Self::Document { source, .. } | Self::Backup { source, .. } => source.root_cause(),
      other => other,
    }
  }
}

impl From<ArchiveError> for StoreError {
  fn from(err: ArchiveError) -> Self {
    match err {
      ArchiveError::InvalidPassword => Self::InvalidPassword,
      ArchiveError::UnsupportedVersion { found, supported } => {
        Self::UnsupportedArchiveVersion { found, supported }
      }
      other => Self::Archive(other),
    }
  }
}

fn format_names(names: &[String]) -> String {
  if names.is_empty() {
    "none".to_string()
  } else {
    names.join(", ")
  }
}
