//! Encrypted backup and restore of project databases and of the whole system.
//!
//! Backup metadata lives in the main database's `backups` table; archives are
//! files under the configured backup directory. A backup row is inserted as
//! `creating` before any data is written and moves to `ready` or `failed`
//! once the archive is complete.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::archive::{ArchiveSummary, FrameReader, FrameWriter, SnapshotScope, ARCHIVE_VERSION};
use super::snapshot::{apply_snapshot, has_data, scan_archive, write_snapshot, SnapshotStats};
use crate::config::BackupSection;
use crate::db::row::{format_timestamp, now, parse_enum_at, timestamp_at, uuid_at};
use crate::db::DatabaseRegistry;
use crate::error::StoreError;
use crate::types::{
  Backup, BackupCreated, BackupKind, BackupOptions, BackupStatus, RestoreOptions, RestoreReport,
};

const BACKUP_COLUMNS: &str = "id, kind, project_id, status, description, size, encrypted, \
   archive_version, checksum, location, created_at, error";

const ARCHIVE_EXTENSION: &str = "krbk";

/// Generated passwords are never shorter than this.
const MIN_GENERATED_PASSWORD: usize = 16;

fn row_to_backup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backup> {
  Ok(Backup {
    id: uuid_at(row, 0)?,
    kind: parse_enum_at(row, 1)?,
    project_id: row.get(2)?,
    status: parse_enum_at(row, 3)?,
    description: row.get(4)?,
    size: row.get::<_, i64>(5)?.max(0) as u64,
    encrypted: row.get(6)?,
    archive_version: row.get(7)?,
    checksum: row.get(8)?,
    location: row.get(9)?,
    created_at: timestamp_at(row, 10)?,
    error: row.get(11)?,
  })
}

fn generate_password(len: usize) -> Zeroizing<String> {
  Zeroizing::new(
    rand::thread_rng()
      .sample_iter(&Alphanumeric)
      .take(len.max(MIN_GENERATED_PASSWORD))
      .map(char::from)
      .collect(),
  )
}

async fn create_archive_file(path: &Path) -> Result<std::fs::File, StoreError> {
  let file = tokio::fs::File::create(path)
    .await
    .map_err(|e| StoreError::io(format!("creating {}", path.display()), e))?;
  Ok(file.into_std().await)
}

async fn open_archive_file(path: &Path) -> Result<std::fs::File, StoreError> {
  let file = tokio::fs::File::open(path)
    .await
    .map_err(|e| StoreError::io(format!("opening {}", path.display()), e))?;
  Ok(file.into_std().await)
}

/// Writes the final frame, flushes and syncs the file.
fn finish_archive(writer: FrameWriter<BufWriter<std::fs::File>>) -> Result<ArchiveSummary, StoreError> {
  let (summary, out) = writer.finish()?;
  let file = out
    .into_inner()
    .map_err(|e| StoreError::io("flushing archive", e.into_error()))?;
  file
    .sync_all()
    .map_err(|e| StoreError::io("syncing archive", e))?;
  Ok(summary)
}

pub struct BackupService {
  registry: Arc<DatabaseRegistry>,
  config: BackupSection,
}

impl BackupService {
  pub fn new(registry: Arc<DatabaseRegistry>, config: BackupSection) -> Self {
    Self { registry, config }
  }

  fn archive_path(&self, kind: BackupKind, owner: &str, id: Uuid) -> PathBuf {
    let filename = format!(
      "{}_{}_{}_{}.{}",
      kind,
      owner,
      now().format("%Y%m%d_%H%M%S"),
      id.simple(),
      ARCHIVE_EXTENSION
    );
    Path::new(&self.config.dir).join(filename)
  }

  /// Snapshots one project into a new encrypted archive.
  pub async fn backup_project(&self, project_id: &str, options: BackupOptions) -> Result<BackupCreated, StoreError> {
    self.registry.ensure_ready().await?;
    let db = self.registry.project(project_id).await?;
    let (password, generated) = self.resolve_password(options.password);

    let backup = self
      .begin(BackupKind::Project, Some(project_id), options.description)
      .await?;
    let path = PathBuf::from(&backup.location);

    let kdf = self.config.kdf();
    let scope = SnapshotScope::Project(project_id.to_string());
    let pw = password.clone();
    let result = async {
      let file = create_archive_file(&path).await?;
      db.call(move |conn| {
        let mut writer = FrameWriter::new(BufWriter::new(file), &pw, kdf)?;
        let stats = write_snapshot(conn, scope, &mut writer)?;
        Ok((finish_archive(writer)?, stats))
      })
      .await
    }
    .await;

    let backup = self.complete(backup, result).await?;
    Ok(BackupCreated {
      backup,
      password: generated.then_some(password),
    })
  }

  /// Snapshots the main database and every project in the catalog into one archive.
  pub async fn backup_system(&self, options: BackupOptions) -> Result<BackupCreated, StoreError> {
    self.registry.ensure_ready().await?;
    let (password, generated) = self.resolve_password(options.password);

    let backup = self.begin(BackupKind::System, None, options.description).await?;
    let path = PathBuf::from(&backup.location);

    let result = self.write_system_archive(&path, password.clone()).await;
    let backup = self.complete(backup, result).await?;
    Ok(BackupCreated {
      backup,
      password: generated.then_some(password),
    })
  }

  async fn write_system_archive(
    &self,
    path: &Path,
    password: Zeroizing<String>,
  ) -> Result<(ArchiveSummary, SnapshotStats), StoreError> {
    let projects = self.registry.list_projects().await?;
    let main = self.registry.main().await?;
    let file = create_archive_file(path).await?;
    let kdf = self.config.kdf();

    // The writer moves from connection to connection; each database is read
    // inside its own closure.
    let (mut writer, mut totals) = main
      .call(move |conn| {
        let mut writer = FrameWriter::new(BufWriter::new(file), &password, kdf)?;
        let stats = write_snapshot(conn, SnapshotScope::Main, &mut writer)?;
        Ok((writer, stats))
      })
      .await?;

    for project in projects {
      let db = self.registry.project(&project.id).await?;
      let (next, stats) = db
        .call(move |conn| {
          let stats = write_snapshot(conn, SnapshotScope::Project(project.id), &mut writer)?;
          Ok((writer, stats))
        })
        .await?;
      writer = next;
      totals.tables += stats.tables;
      totals.rows += stats.rows;
    }

    let summary = main.call(move |_| finish_archive(writer)).await?;
    Ok((summary, totals))
  }

  fn resolve_password(&self, supplied: Option<String>) -> (Zeroizing<String>, bool) {
    match supplied {
      Some(p) if !p.is_empty() => (Zeroizing::new(p), false),
      _ => (generate_password(self.config.generated_password_length), true),
    }
  }

  /// Records a `creating` row for a new archive.
  async fn begin(
    &self,
    kind: BackupKind,
    project_id: Option<&str>,
    description: Option<String>,
  ) -> Result<Backup, StoreError> {
    tokio::fs::create_dir_all(&self.config.dir)
      .await
      .map_err(|e| StoreError::io(format!("creating {}", self.config.dir), e))?;

    let id = Uuid::new_v4();
    let backup = Backup {
      id,
      kind,
      project_id: project_id.map(str::to_string),
      status: BackupStatus::Creating,
      description,
      size: 0,
      encrypted: true,
      archive_version: ARCHIVE_VERSION,
      checksum: None,
      location: self
        .archive_path(kind, project_id.unwrap_or("system"), id)
        .to_string_lossy()
        .into_owned(),
      created_at: now(),
      error: None,
    };

    let row = backup.clone();
    self
      .registry
      .main()
      .await?
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO backups (id, kind, project_id, status, description, size, encrypted, archive_version, location, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?7, ?8)",
            rusqlite::params![
              row.id.to_string(),
              row.kind.to_string(),
              row.project_id,
              row.status.to_string(),
              row.description,
              row.archive_version,
              row.location,
              format_timestamp(&row.created_at)
            ],
          )
          .map_err(|e| StoreError::query("INSERT INTO backups", e))?;
        Ok(())
      })
      .await?;
    Ok(backup)
  }

  /// Moves a `creating` row to `ready` or `failed`. On any failure,
  /// including the final status update, the archive is removed and the row
  /// marked `failed`.
  async fn complete(
    &self,
    mut backup: Backup,
    result: Result<(ArchiveSummary, SnapshotStats), StoreError>,
  ) -> Result<Backup, StoreError> {
    let (summary, stats) = match result {
      Ok(done) => done,
      Err(err) => return Err(self.fail(&backup, err).await),
    };

    let marked = self
      .registry
      .execute_main(
        "UPDATE backups SET status = ?1, size = ?2, checksum = ?3 WHERE id = ?4",
        vec![
          BackupStatus::Ready.to_string().into(),
          Value::Integer(i64::try_from(summary.size).unwrap_or(i64::MAX)),
          summary.checksum.clone().into(),
          backup.id.to_string().into(),
        ],
      )
      .await;
    if let Err(err) = marked {
      return Err(self.fail(&backup, err).await);
    }

    backup.status = BackupStatus::Ready;
    backup.size = summary.size;
    backup.checksum = Some(summary.checksum);
    tracing::info!(
      backup_id = %backup.id,
      kind = %backup.kind,
      project_id = backup.project_id.as_deref().unwrap_or("-"),
      tables = stats.tables,
      rows = stats.rows,
      size = backup.size,
      "Backup created: {}",
      backup.location
    );
    Ok(backup)
  }

  /// Removes the archive, records the error on the row and returns it with
  /// the backup attached.
  async fn fail(&self, backup: &Backup, err: StoreError) -> StoreError {
    let message = err.to_string();
    tracing::warn!(backup_id = %backup.id, "Backup failed: {}", message);
    remove_archive(&backup.location).await;

    let marked = self
      .registry
      .execute_main(
        "UPDATE backups SET status = ?1, error = ?2 WHERE id = ?3",
        vec![
          BackupStatus::Failed.to_string().into(),
          message.into(),
          backup.id.to_string().into(),
        ],
      )
      .await;
    if let Err(e) = marked {
      tracing::warn!(backup_id = %backup.id, "Could not mark backup failed: {}", e);
    }
    err.in_backup(backup.id, backup.project_id.as_deref())
  }

  /// Replaces a project's data with the contents of a project backup.
  ///
  /// The password is checked before anything else touches the project, and
  /// the replay itself runs in one transaction.
  pub async fn restore_project(&self, backup_id: Uuid, options: RestoreOptions) -> Result<RestoreReport, StoreError> {
    self.registry.ensure_ready().await?;
    let backup = self.restorable(backup_id).await?;
    let project_id = match (backup.kind, backup.project_id.clone()) {
      (BackupKind::Project, Some(id)) => id,
      (BackupKind::System, _) => {
        return Err(StoreError::InvalidRestoreTarget {
          id: backup_id,
          reason: "system backups cannot be restored into a single project".into(),
        })
      }
      (BackupKind::Project, None) => {
        return Err(StoreError::InvalidRestoreTarget {
          id: backup_id,
          reason: "backup does not name a project".into(),
        })
      }
    };

    let db = self.registry.project(&project_id).await?;
    let file = open_archive_file(Path::new(&backup.location))
      .await
      .map_err(|e| e.in_backup(backup_id, Some(project_id.as_str())))?;
    let scope = SnapshotScope::Project(project_id.clone());
    let target = project_id.clone();
    let RestoreOptions { password, overwrite } = options;

    let stats = db
      .call(move |conn| {
        let mut reader = FrameReader::open(BufReader::new(file), &password)?;
        if !overwrite && has_data(conn, &scope)? {
          return Err(StoreError::RestoreConflict { project_id: target });
        }
        apply_snapshot(conn, &mut reader, &scope)
      })
      .await
      .map_err(|e| e.in_backup(backup_id, Some(project_id.as_str())))?;

    tracing::info!(
      backup_id = %backup_id,
      project_id = %project_id,
      tables = stats.tables,
      rows = stats.rows,
      "Restored project from backup"
    );
    Ok(RestoreReport {
      backup_id,
      project_id,
      tables: stats.tables,
      rows: stats.rows,
    })
  }

  async fn restorable(&self, backup_id: Uuid) -> Result<Backup, StoreError> {
    let backup = self
      .get_backup(backup_id)
      .await?
      .ok_or(StoreError::BackupNotFound(backup_id))?;
    if backup.status != BackupStatus::Ready {
      return Err(StoreError::BackupNotReady {
        id: backup_id,
        status: backup.status,
      });
    }
    Ok(backup)
  }

  /// Decrypts a ready archive without applying it and reports each database
  /// section it holds.
  pub async fn inspect_backup(
    &self,
    backup_id: Uuid,
    password: &str,
  ) -> Result<Vec<(SnapshotScope, SnapshotStats)>, StoreError> {
    let backup = self.restorable(backup_id).await?;
    let project_id = backup.project_id.clone();
    let password = Zeroizing::new(password.to_string());
    let scanned = async {
      let file = open_archive_file(Path::new(&backup.location)).await?;
      self
        .registry
        .main()
        .await?
        .call(move |_| {
          let mut reader = FrameReader::open(BufReader::new(file), &password)?;
          scan_archive(&mut reader)
        })
        .await
    }
    .await;
    scanned.map_err(|e| e.in_backup(backup_id, project_id.as_deref()))
  }

  /// Ready backups, newest first.
  pub async fn list_backups(
    &self,
    project_id: Option<&str>,
    kind: Option<BackupKind>,
  ) -> Result<Vec<Backup>, StoreError> {
    let mut sql = format!("SELECT {} FROM backups WHERE status = ?", BACKUP_COLUMNS);
    let mut params: Vec<Value> = vec![BackupStatus::Ready.to_string().into()];
    if let Some(project_id) = project_id {
      sql.push_str(" AND project_id = ?");
      params.push(project_id.to_string().into());
    }
    if let Some(kind) = kind {
      sql.push_str(" AND kind = ?");
      params.push(kind.to_string().into());
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    self
      .registry
      .main()
      .await?
      .query_map(sql, params, row_to_backup)
      .await
  }

  /// Any backup row, whatever its status.
  pub async fn get_backup(&self, backup_id: Uuid) -> Result<Option<Backup>, StoreError> {
    let id = backup_id.to_string();
    self
      .registry
      .main()
      .await?
      .call(move |conn| {
        let sql = format!("SELECT {} FROM backups WHERE id = ?1", BACKUP_COLUMNS);
        conn
          .query_row(&sql, [&id], row_to_backup)
          .optional()
          .map_err(|e| StoreError::query(&sql, e))
      })
      .await
  }

  /// Removes the backup row and its archive. `false` when no such backup exists.
  pub async fn delete_backup(&self, backup_id: Uuid) -> Result<bool, StoreError> {
    let Some(backup) = self.get_backup(backup_id).await? else {
      return Ok(false);
    };
    remove_archive(&backup.location).await;

    let removed = self
      .registry
      .execute_main(
        "DELETE FROM backups WHERE id = ?1",
        vec![backup_id.to_string().into()],
      )
      .await?;
    tracing::info!(backup_id = %backup_id, "Deleted backup");
    Ok(removed > 0)
  }

  /// Recomputes the archive's SHA-256 and compares it with the recorded one.
  pub async fn verify_backup(&self, backup_id: Uuid) -> Result<bool, StoreError> {
    let backup = self.restorable(backup_id).await?;
    let Some(expected) = backup.checksum else {
      return Ok(false);
    };

    let path = Path::new(&backup.location);
    let mut file = tokio::fs::File::open(path)
      .await
      .map_err(|e| StoreError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
      let n = file
        .read(&mut buf)
        .await
        .map_err(|e| StoreError::io(format!("reading {}", path.display()), e))?;
      if n == 0 {
        break;
      }
      hasher.update(&buf[..n]);
    }

    let actual = hex::encode(hasher.finalize());
    let ok = actual == expected;
    if !ok {
      tracing::warn!(backup_id = %backup_id, "Backup checksum mismatch");
    }
    Ok(ok)
  }
}

async fn remove_archive(location: &str) {
  match tokio::fs::remove_file(location).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!("Failed to delete backup archive {}: {}", location, e),
  }
}
