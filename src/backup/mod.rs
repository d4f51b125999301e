pub mod archive;
mod service;
mod snapshot;

pub use archive::{ArchiveError, ArchiveSummary, KdfParams, SnapshotScope, ARCHIVE_VERSION};
pub use service::BackupService;
pub use snapshot::SnapshotStats;
