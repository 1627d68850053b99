//! Connection readiness checks shared by SQLite repositories.

use crate::db::migrations::{current_user_version, latest_version};
use crate::repo::record_store::{RepoError, RepoResult};
use rusqlite::Connection;

/// Fails unless `conn` is fully migrated and `table` carries every column.
pub(crate) fn ensure_table_ready(
    conn: &Connection,
    table: &'static str,
    columns: impl IntoIterator<Item = &'static str>,
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, table)? {
        return Err(RepoError::MissingRequiredTable(table));
    }

    let existing = table_columns(conn, table)?;
    for column in columns {
        if !existing.iter().any(|name| name == column) {
            return Err(RepoError::MissingRequiredColumn { table, column });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}
