//! Table-level snapshots of one SQLite database into an archive record
//! stream, and the transactional replay of such a stream.

use std::io::{Read, Write};

use rusqlite::{Connection, TransactionBehavior};

use super::archive::{ArchiveError, Cell, FrameReader, FrameWriter, Record, SnapshotScope};
use crate::db::sanitize::quote_identifier;
use crate::db::schema::table_columns;
use crate::error::StoreError;

/// Tables and rows written or replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
  pub tables: usize,
  pub rows: u64,
}

/// Tables that carry user data. Migration bookkeeping is never captured, nor
/// is the main database's backup catalog.
pub(crate) fn user_tables(conn: &Connection, scope: &SnapshotScope) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM sqlite_master
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != 'schema_migrations'
     ORDER BY name",
  )?;
  let names = stmt
    .query_map([], |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(match scope {
    SnapshotScope::Main => names.into_iter().filter(|n| n != "backups").collect(),
    SnapshotScope::Project(_) => names,
  })
}

/// True when any user table holds at least one row.
pub(crate) fn has_data(conn: &Connection, scope: &SnapshotScope) -> rusqlite::Result<bool> {
  for table in user_tables(conn, scope)? {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {})", quote_identifier(&table));
    let exists: bool = conn.query_row(&sql, [], |row| row.get(0))?;
    if exists {
      return Ok(true);
    }
  }
  Ok(false)
}

/// Writes `Database`, then `Table` and `Row` records for every user table,
/// read inside one transaction so the snapshot is consistent.
pub(crate) fn write_snapshot<W: Write>(
  conn: &mut Connection,
  scope: SnapshotScope,
  writer: &mut FrameWriter<W>,
) -> Result<SnapshotStats, StoreError> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
  let tables = user_tables(&tx, &scope)?;
  writer.write_record(&Record::Database { scope })?;

  let mut stats = SnapshotStats::default();
  for table in tables {
    let columns = table_columns(&tx, &table)?;
    let column_list = columns
      .iter()
      .map(|c| quote_identifier(c))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "SELECT {} FROM {} ORDER BY rowid",
      column_list,
      quote_identifier(&table)
    );

    writer.write_record(&Record::Table {
      name: table.clone(),
      columns: columns.clone(),
    })?;

    let mut stmt = tx.prepare(&sql).map_err(|e| StoreError::query(&sql, e))?;
    let mut rows = stmt.query([]).map_err(|e| StoreError::query(&sql, e))?;
    while let Some(row) = rows.next()? {
      let cells = (0..columns.len())
        .map(|idx| row.get_ref(idx).map(Cell::from))
        .collect::<rusqlite::Result<Vec<_>>>()?;
      writer.write_record(&Record::Row(cells))?;
      stats.rows += 1;
    }
    stats.tables += 1;
  }

  tx.commit()?;
  Ok(stats)
}

/// Replaces the contents of every user table with the records of one
/// `Database` section, inside one transaction. Any failure, including a frame
/// that fails authentication halfway through, rolls everything back.
pub(crate) fn apply_snapshot<R: Read>(
  conn: &mut Connection,
  reader: &mut FrameReader<R>,
  expected: &SnapshotScope,
) -> Result<SnapshotStats, StoreError> {
  match reader.next_record()? {
    Record::Database { scope } if &scope == expected => {}
    Record::Database { scope } => {
      return Err(
        ArchiveError::ScopeMismatch {
          expected: expected.to_string(),
          found: scope.to_string(),
        }
        .into(),
      )
    }
    _ => return Err(ArchiveError::UnexpectedRecord("leading").into()),
  }

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;

  let live = user_tables(&tx, expected)?;
  for table in &live {
    let sql = format!("DELETE FROM {}", quote_identifier(table));
    tx.execute(&sql, []).map_err(|e| StoreError::query(&sql, e))?;
  }

  let mut stats = SnapshotStats::default();
  let mut insert: Option<(String, usize)> = None;
  loop {
    match reader.next_record()? {
      Record::Table { name, columns } => {
        if !live.contains(&name) {
          return Err(ArchiveError::UnknownTable(name).into());
        }
        let live_columns = table_columns(&tx, &name)?;
        if let Some(missing) = columns.iter().find(|c| !live_columns.contains(c)) {
          return Err(ArchiveError::UnknownTable(format!("{}.{}", name, missing)).into());
        }
        let sql = format!(
          "INSERT INTO {} ({}) VALUES ({})",
          quote_identifier(&name),
          columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", "),
          vec!["?"; columns.len()].join(", ")
        );
        insert = Some((sql, columns.len()));
        stats.tables += 1;
      }
      Record::Row(cells) => {
        let Some((sql, width)) = insert.as_ref() else {
          return Err(ArchiveError::UnexpectedRecord("row").into());
        };
        if cells.len() != *width {
          return Err(ArchiveError::UnexpectedRecord("malformed row").into());
        }
        let mut stmt = tx.prepare_cached(sql).map_err(|e| StoreError::query(sql, e))?;
        stmt
          .execute(rusqlite::params_from_iter(cells.iter()))
          .map_err(|e| StoreError::query(sql, e))?;
        stats.rows += 1;
      }
      Record::Database { .. } => return Err(ArchiveError::UnexpectedRecord("database").into()),
      Record::End => break,
    }
  }

  tx.commit()?;
  Ok(stats)
}

/// Reads a whole archive without applying it: `(scope, stats)` per section.
pub(crate) fn scan_archive<R: Read>(
  reader: &mut FrameReader<R>,
) -> Result<Vec<(SnapshotScope, SnapshotStats)>, StoreError> {
  let mut sections: Vec<(SnapshotScope, SnapshotStats)> = Vec::new();
  loop {
    match reader.next_record()? {
      Record::Database { scope } => sections.push((scope, SnapshotStats::default())),
      Record::Table { .. } => match sections.last_mut() {
        Some((_, stats)) => stats.tables += 1,
        None => return Err(ArchiveError::UnexpectedRecord("table").into()),
      },
      Record::Row(_) => match sections.last_mut() {
        Some((_, stats)) => stats.rows += 1,
        None => return Err(ArchiveError::UnexpectedRecord("row").into()),
      },
      Record::End => return Ok(sections),
    }
  }
}
