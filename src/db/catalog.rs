//! Project catalog kept in the main database.

use rusqlite::OptionalExtension;

use super::registry::DatabaseRegistry;
use super::row::{format_timestamp, now, parse_enum_at, timestamp_at};
use super::sanitize::validate_project_id;
use crate::error::StoreError;
use crate::types::{Project, ProjectStatus};

const PROJECT_COLUMNS: &str = "id, name, status, created_at, updated_at";

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
  Ok(Project {
    id: row.get(0)?,
    name: row.get(1)?,
    status: parse_enum_at(row, 2)?,
    created_at: timestamp_at(row, 3)?,
    updated_at: timestamp_at(row, 4)?,
  })
}

impl DatabaseRegistry {
  /// Registers a project. Its database is created on first access, not here.
  pub async fn create_project(&self, id: &str, name: &str) -> Result<Project, StoreError> {
    validate_project_id(id)?;
    let ts = now();
    let project = Project {
      id: id.to_string(),
      name: name.to_string(),
      status: ProjectStatus::Active,
      created_at: ts,
      updated_at: ts,
    };

    let row = project.clone();
    self
      .main()
      .await?
      .call(move |conn| {
        let stamp = format_timestamp(&row.created_at);
        let inserted = conn
          .execute(
            "INSERT OR IGNORE INTO projects (id, name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![row.id, row.name, row.status.to_string(), stamp],
          )
          .map_err(|e| StoreError::query("INSERT INTO projects", e))?;
        if inserted == 0 {
          return Err(StoreError::ProjectExists(row.id));
        }
        Ok(())
      })
      .await?;

    tracing::info!(project_id = id, "Created project");
    Ok(project)
  }

  pub async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
    let id = id.to_string();
    self
      .main()
      .await?
      .call(move |conn| {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        conn
          .query_row(&sql, [&id], row_to_project)
          .optional()
          .map_err(|e| StoreError::query(&sql, e))
      })
      .await
  }

  pub async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
    let sql = format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS);
    self.main().await?.query_map(sql, Vec::new(), row_to_project).await
  }

  pub async fn set_project_status(&self, id: &str, status: ProjectStatus) -> Result<Project, StoreError> {
    let id = id.to_string();
    self
      .main()
      .await?
      .call(move |conn| {
        let changed = conn
          .execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.to_string(), format_timestamp(&now()), id],
          )
          .map_err(|e| StoreError::query("UPDATE projects", e))?;
        if changed == 0 {
          return Err(StoreError::ProjectNotFound(id));
        }
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        conn
          .query_row(&sql, [&id], row_to_project)
          .map_err(|e| StoreError::query(&sql, e))
      })
      .await
  }
}
