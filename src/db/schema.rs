//! Schema definitions and forward-only migrations for the main and
//! per-project databases.

use serde::{Deserialize, Serialize};

use super::sanitize::quote_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
  Main,
  Project,
}

impl DatabaseKind {
  pub fn migrations(&self) -> &'static [Migration] {
    match self {
      Self::Main => MAIN_MIGRATIONS,
      Self::Project => PROJECT_MIGRATIONS,
    }
  }

  fn expected_tables(&self) -> &'static [(&'static str, &'static [&'static str])] {
    match self {
      Self::Main => MAIN_TABLES,
      Self::Project => PROJECT_TABLES,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Migration {
  pub version: i64,
  pub name: &'static str,
  pub sql: &'static str,
}

const MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
"#;

pub const MAIN_MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    name: "initial",
    sql: r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);

CREATE TABLE IF NOT EXISTS admin_users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'admin',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES admin_users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backups (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    project_id TEXT,
    status TEXT NOT NULL,
    description TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    encrypted INTEGER NOT NULL DEFAULT 1,
    archive_version INTEGER NOT NULL,
    location TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_backups_project ON backups(project_id, created_at);
"#,
  },
  Migration {
    version: 2,
    name: "backup_checksums",
    sql: r#"
ALTER TABLE backups ADD COLUMN checksum TEXT;
ALTER TABLE backups ADD COLUMN error TEXT;
"#,
  },
];

pub const PROJECT_MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    name: "initial",
    sql: r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    schema TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(project_id, name)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT 'system',
    updated_by TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime_type TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    storage_path TEXT NOT NULL,
    uploaded_by TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_users (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    email TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'member',
    created_at TEXT NOT NULL,
    UNIQUE(project_id, email)
);

CREATE TABLE IF NOT EXISTS changelog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    action TEXT NOT NULL,
    performed_by TEXT,
    created_at TEXT NOT NULL
);
"#,
  },
  Migration {
    version: 2,
    name: "documents_created_index",
    sql: r#"
CREATE INDEX IF NOT EXISTS idx_documents_collection_created ON documents(collection_id, created_at);
"#,
  },
];

const MAIN_TABLES: &[(&str, &[&str])] = &[
  ("projects", &["id", "name", "status", "created_at", "updated_at"]),
  ("admin_users", &["id", "username", "email", "password_hash", "role", "created_at"]),
  ("sessions", &["id", "user_id", "token_hash", "expires_at", "created_at"]),
  (
    "backups",
    &[
      "id",
      "kind",
      "project_id",
      "status",
      "description",
      "size",
      "encrypted",
      "archive_version",
      "location",
      "created_at",
      "checksum",
      "error",
    ],
  ),
];

const PROJECT_TABLES: &[(&str, &[&str])] = &[
  (
    "collections",
    &["id", "project_id", "name", "description", "schema", "created_at", "updated_at"],
  ),
  (
    "documents",
    &[
      "id",
      "collection_id",
      "project_id",
      "data",
      "created_by",
      "updated_by",
      "created_at",
      "updated_at",
    ],
  ),
  (
    "files",
    &["id", "project_id", "filename", "mime_type", "size", "storage_path", "uploaded_by", "created_at"],
  ),
  ("project_users", &["id", "project_id", "email", "role", "created_at"]),
  (
    "changelog",
    &["id", "project_id", "entity_type", "entity_id", "action", "performed_by", "created_at"],
  ),
];

/// Drift between the live schema and what this build expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
  pub database: String,
  pub missing_tables: Vec<String>,
  /// `table.column` entries
  pub missing_columns: Vec<String>,
  pub pending_migrations: Vec<i64>,
}

impl SchemaReport {
  pub fn is_current(&self) -> bool {
    self.missing_tables.is_empty() && self.missing_columns.is_empty() && self.pending_migrations.is_empty()
  }

  pub fn problems(&self) -> Vec<String> {
    let mut out: Vec<String> = self
      .missing_tables
      .iter()
      .map(|t| format!("missing table {}", t))
      .collect();
    out.extend(self.missing_columns.iter().map(|c| format!("missing column {}", c)));
    out.extend(
      self
        .pending_migrations
        .iter()
        .map(|v| format!("pending migration {}", v)),
    );
    out
  }
}

fn applied_versions(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<i64>> {
  let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
  let rows = stmt.query_map([], |row| row.get(0))?;
  rows.collect()
}

/// Applies every migration not yet recorded. Returns how many ran.
pub(crate) fn apply_migrations(conn: &mut rusqlite::Connection, kind: DatabaseKind) -> rusqlite::Result<usize> {
  conn.execute_batch(MIGRATIONS_TABLE)?;
  let applied = applied_versions(conn)?;

  let mut count = 0;
  for migration in kind.migrations() {
    if applied.contains(&migration.version) {
      continue;
    }
    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
      "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
      rusqlite::params![migration.version, migration.name],
    )?;
    tx.commit()?;
    tracing::info!(
      version = migration.version,
      name = migration.name,
      "Applied {:?} migration",
      kind
    );
    count += 1;
  }
  Ok(count)
}

/// Compares the live schema with the expected tables, columns and migrations.
pub(crate) fn inspect(
  conn: &rusqlite::Connection,
  kind: DatabaseKind,
  database: &str,
) -> rusqlite::Result<SchemaReport> {
  let mut report = SchemaReport {
    database: database.to_string(),
    ..Default::default()
  };

  for (table, columns) in kind.expected_tables() {
    let live = table_columns(conn, table)?;
    if live.is_empty() {
      report.missing_tables.push(table.to_string());
      continue;
    }
    for column in columns.iter() {
      if !live.iter().any(|c| c == column) {
        report.missing_columns.push(format!("{}.{}", table, column));
      }
    }
  }

  let has_migrations_table: bool = conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
    [],
    |row| row.get(0),
  )?;
  let applied = if has_migrations_table {
    applied_versions(conn)?
  } else {
    Vec::new()
  };
  report.pending_migrations = kind
    .migrations()
    .iter()
    .map(|m| m.version)
    .filter(|v| !applied.contains(v))
    .collect();

  Ok(report)
}

/// Column names of a table; empty when the table does not exist.
pub(crate) fn table_columns(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
  let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
  rows.collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn migration_versions_are_increasing() {
    for kind in [DatabaseKind::Main, DatabaseKind::Project] {
      let versions: Vec<i64> = kind.migrations().iter().map(|m| m.version).collect();
      assert!(versions.windows(2).all(|w| w[0] < w[1]), "{:?}", kind);
    }
  }

  #[test]
  fn migrations_are_idempotent() {
    let mut conn = rusqlite::Connection::open_in_memory().unwrap();
    assert_eq!(apply_migrations(&mut conn, DatabaseKind::Project).unwrap(), 2);
    assert_eq!(apply_migrations(&mut conn, DatabaseKind::Project).unwrap(), 0);

    let report = inspect(&conn, DatabaseKind::Project, "p1").unwrap();
    assert!(report.is_current(), "{:?}", report);
  }

  #[test]
  fn inspect_reports_missing_schema() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let report = inspect(&conn, DatabaseKind::Main, "main").unwrap();
    assert!(report.missing_tables.contains(&"backups".to_string()));
    assert_eq!(report.pending_migrations, vec![1, 2]);
    assert!(!report.is_current());
    assert!(report.problems().iter().any(|p| p == "pending migration 2"));
  }

  #[test]
  fn inspect_reports_missing_columns() {
    let mut conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(MIGRATIONS_TABLE).unwrap();
    conn.execute_batch(MAIN_MIGRATIONS[0].sql).unwrap();
    conn
      .execute("INSERT INTO schema_migrations (version, name) VALUES (1, 'initial')", [])
      .unwrap();

    let report = inspect(&conn, DatabaseKind::Main, "main").unwrap();
    assert!(report.missing_tables.is_empty());
    assert!(report.missing_columns.contains(&"backups.checksum".to_string()));
    assert_eq!(report.pending_migrations, vec![2]);

    assert_eq!(apply_migrations(&mut conn, DatabaseKind::Main).unwrap(), 1);
    assert!(inspect(&conn, DatabaseKind::Main, "main").unwrap().is_current());
  }
}
