//! Per-tenant database routing.
//!
//! The registry owns the main database and one lazily opened database per
//! project. Every project handle sits behind its own `OnceCell`, so the first
//! access for a project opens and migrates it exactly once while accesses to
//! other projects proceed without waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::database::{Database, JsonRow, SqlParams};
use super::sanitize::validate_project_id;
use super::schema::{self, DatabaseKind, SchemaReport};
use crate::config::StorageSection;
use crate::error::StoreError;

pub struct DatabaseRegistry {
  config: StorageSection,
  main: OnceCell<Database>,
  projects: Mutex<HashMap<String, Arc<OnceCell<Database>>>>,
  opened: AtomicUsize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
  pub database: String,
  pub ok: bool,
  pub latency_ms: f64,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
  pub healthy: bool,
  pub main: DatabaseHealth,
  pub projects: Vec<DatabaseHealth>,
}

impl DatabaseRegistry {
  pub fn new(config: StorageSection) -> Self {
    Self {
      config,
      main: OnceCell::new(),
      projects: Mutex::new(HashMap::new()),
      opened: AtomicUsize::new(0),
    }
  }

  pub fn config(&self) -> &StorageSection {
    &self.config
  }

  /// Readiness gate: resolves once the main database is open and migrated.
  pub async fn ensure_ready(&self) -> Result<(), StoreError> {
    self.main().await.map(|_| ())
  }

  pub async fn main(&self) -> Result<Database, StoreError> {
    self
      .main
      .get_or_try_init(|| self.open(DatabaseKind::Main, "main"))
      .await
      .cloned()
  }

  pub async fn project(&self, project_id: &str) -> Result<Database, StoreError> {
    validate_project_id(project_id)?;

    let cell = {
      let mut projects = self.projects.lock();
      projects
        .entry(project_id.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone()
    };

    let db = cell
      .get_or_try_init(|| self.open(DatabaseKind::Project, project_id))
      .await?
      .clone();
    Ok(db)
  }

  async fn open(&self, kind: DatabaseKind, name: &str) -> Result<Database, StoreError> {
    let (label, path) = match kind {
      DatabaseKind::Main => ("main".to_string(), self.config.main_path()),
      DatabaseKind::Project => (format!("project:{}", name), self.config.project_path(name)),
    };

    if let Some(parent) = path.as_ref().and_then(|p| p.parent()) {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| StoreError::io(format!("creating {}", parent.display()), e))?;
    }

    let db = Database::open(label.clone(), path.as_deref()).await?;
    let applied = db
      .call(move |conn| schema::apply_migrations(conn, kind).map_err(StoreError::from))
      .await?;

    self.opened.fetch_add(1, Ordering::SeqCst);
    match path {
      Some(p) => tracing::info!(database = %label, migrations = applied, "Opened {}", p.display()),
      None => tracing::info!(database = %label, migrations = applied, "Opened in-memory database"),
    }
    Ok(db)
  }

  /// Number of databases opened and initialized since the registry was created.
  pub fn opened_count(&self) -> usize {
    self.opened.load(Ordering::SeqCst)
  }

  /// Ids of projects whose database is currently open.
  pub fn open_projects(&self) -> Vec<String> {
    let projects = self.projects.lock();
    let mut ids: Vec<String> = projects
      .iter()
      .filter(|(_, cell)| cell.initialized())
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  fn open_project_handles(&self) -> Vec<(String, Database)> {
    let projects = self.projects.lock();
    let mut handles: Vec<(String, Database)> = projects
      .iter()
      .filter_map(|(id, cell)| cell.get().map(|db| (id.clone(), db.clone())))
      .collect();
    handles.sort_by(|a, b| a.0.cmp(&b.0));
    handles
  }

  /// Drops the cached handle for a project. The connection closes once the
  /// last clone is gone; the next access reopens the same file.
  pub fn close_project(&self, project_id: &str) -> bool {
    let removed = self.projects.lock().remove(project_id).is_some();
    if removed {
      tracing::info!(project_id, "Closed project database");
    }
    removed
  }

  pub async fn query_main(&self, sql: &str, params: SqlParams) -> Result<Vec<JsonRow>, StoreError> {
    self.main().await?.query_json(sql, params).await
  }

  pub async fn query_project(
    &self,
    project_id: &str,
    sql: &str,
    params: SqlParams,
  ) -> Result<Vec<JsonRow>, StoreError> {
    self.project(project_id).await?.query_json(sql, params).await
  }

  pub async fn execute_main(&self, sql: &str, params: SqlParams) -> Result<usize, StoreError> {
    self.main().await?.execute(sql, params).await
  }

  pub async fn execute_project(
    &self,
    project_id: &str,
    sql: &str,
    params: SqlParams,
  ) -> Result<usize, StoreError> {
    self.project(project_id).await?.execute(sql, params).await
  }

  /// Pings the main database and every open project database.
  pub async fn health_check(&self) -> HealthReport {
    let main = match self.main().await {
      Ok(db) => ping(&db).await,
      Err(e) => DatabaseHealth {
        database: "main".into(),
        ok: false,
        latency_ms: 0.0,
        error: Some(e.to_string()),
      },
    };

    let mut projects = Vec::new();
    for (_, db) in self.open_project_handles() {
      projects.push(ping(&db).await);
    }

    let healthy = main.ok && projects.iter().all(|p| p.ok);
    if !healthy {
      tracing::warn!("Health check found unreachable databases");
    }
    HealthReport {
      healthy,
      main,
      projects,
    }
  }

  /// Reports schema drift for the main database and every open project database.
  pub async fn validate_schema(&self) -> Result<Vec<SchemaReport>, StoreError> {
    let mut reports = vec![inspect(&self.main().await?, DatabaseKind::Main).await?];
    for (_, db) in self.open_project_handles() {
      reports.push(inspect(&db, DatabaseKind::Project).await?);
    }
    Ok(reports)
  }

  /// Fails with `SchemaDrift` for the first database that is not current.
  pub async fn ensure_schema_current(&self) -> Result<(), StoreError> {
    for report in self.validate_schema().await? {
      if !report.is_current() {
        return Err(StoreError::SchemaDrift {
          missing: report.problems(),
          database: report.database,
        });
      }
    }
    Ok(())
  }

  /// Applies pending migrations everywhere that is open. Returns how many ran.
  pub async fn migrate(&self) -> Result<usize, StoreError> {
    let mut targets = vec![(DatabaseKind::Main, self.main().await?)];
    targets.extend(
      self
        .open_project_handles()
        .into_iter()
        .map(|(_, db)| (DatabaseKind::Project, db)),
    );

    let mut applied = 0;
    for (kind, db) in targets {
      applied += db
        .call(move |conn| schema::apply_migrations(conn, kind).map_err(StoreError::from))
        .await?;
    }
    tracing::info!(applied, "Migrations complete");
    Ok(applied)
  }
}

async fn ping(db: &Database) -> DatabaseHealth {
  let started = Instant::now();
  let result = db
    .query_map("SELECT 1", Vec::new(), |row| row.get::<_, i64>(0))
    .await;
  DatabaseHealth {
    database: db.label().to_string(),
    ok: result.is_ok(),
    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
    error: result.err().map(|e| e.to_string()),
  }
}

async fn inspect(db: &Database, kind: DatabaseKind) -> Result<SchemaReport, StoreError> {
  let label = db.label().to_string();
  db.call(move |conn| schema::inspect(conn, kind, &label).map_err(StoreError::from))
    .await
}
