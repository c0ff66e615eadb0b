//! SQLite schema DDL and migration steps.
//!
//! The schema version lives in `PRAGMA user_version`; a fresh database
//! reports 0 and is migrated step by step up to [`SCHEMA_VERSION`].

use rusqlite::Connection;

use crate::errors::CuratorResult;

pub const SCHEMA_VERSION: i32 = 1;

/// Baseline tables, replayable on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scan_files (
        path TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        mtime_ns INTEGER NOT NULL,
        size_bytes INTEGER NOT NULL,
        payload_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS context_indexes (
        ctx_id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        payload_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS change_events (
        seq INTEGER PRIMARY KEY,
        change_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        payload_json TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_scan_files_hash ON scan_files(content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_context_indexes_created ON context_indexes(created_at, ctx_id);",
];

pub fn get_schema_version(conn: &Connection) -> CuratorResult<i32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i32) -> CuratorResult<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    Ok(())
}

/// Run pending migrations. Each step runs inside a SAVEPOINT so a failure
/// rolls back only that step and leaves the version where it was.
pub fn migrate_schema(conn: &Connection) -> CuratorResult<()> {
    let mut current = get_schema_version(conn)?;
    while current < SCHEMA_VERSION {
        let next = current + 1;
        conn.execute_batch("SAVEPOINT curator_migrate_step;")?;
        let step = (|| -> CuratorResult<()> {
            match next {
                1 => migrate_to_v1(conn)?,
                _ => {}
            }
            set_schema_version(conn, next)?;
            conn.execute_batch("RELEASE SAVEPOINT curator_migrate_step;")?;
            Ok(())
        })();
        if let Err(e) = step {
            let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT curator_migrate_step;");
            let _ = conn.execute_batch("RELEASE SAVEPOINT curator_migrate_step;");
            return Err(e);
        }
        current = next;
    }
    Ok(())
}

/// v0 -> v1: baseline tables.
fn migrate_to_v1(conn: &Connection) -> CuratorResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    Ok(())
}
