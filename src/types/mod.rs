mod backup;
mod collection;
mod document;
mod project;
mod query;

pub use backup::{
  Backup, BackupCreated, BackupKind, BackupOptions, BackupStatus, RestoreOptions, RestoreReport,
};
pub use collection::Collection;
pub use document::Document;
pub use project::{Project, ProjectStatus};
pub use query::{DocumentPage, ListOptions, OrderDirection, SearchOptions};
