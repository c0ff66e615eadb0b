//! SQLite storage for the scan cache, context indexes and the change log.
//!
//! Each public method opens its own connection, so a `Database` is just a
//! resolved path and can be shared freely.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::context::index::ContextIndex;
use crate::context::propagator::PropagationRecord;
use crate::errors::CuratorResult;
use crate::indexer::filesystem::Fingerprint;
use crate::indexer::pipeline::CachedFile;
use crate::models::FileIndex;
use crate::store::schema;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Resolve `db_path`, create its parent directories and migrate the
    /// schema to the current version.
    pub fn open(db_path: impl AsRef<Path>) -> CuratorResult<Self> {
        let expanded = expand_tilde(db_path.as_ref());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self { db_path: resolved };
        db.init_schema()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> CuratorResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> CuratorResult<()> {
        let conn = self.connect()?;
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        schema::migrate_schema(&conn)
    }

    pub fn schema_version(&self) -> CuratorResult<i32> {
        schema::get_schema_version(&self.connect()?)
    }

    // -- scan cache ----------------------------------------------------------

    /// Replace the persisted scan cache with `entries`.
    pub fn save_scan<'a, I>(&self, entries: I) -> CuratorResult<usize>
    where
        I: IntoIterator<Item = &'a CachedFile>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scan_files;", [])?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scan_files (path, content_hash, mtime_ns, size_bytes, payload_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for entry in entries {
                let payload = serde_json::to_string(entry.index.as_ref())?;
                stmt.execute(params![
                    entry.index.path,
                    entry.index.content_hash,
                    entry.fingerprint.mtime_ns,
                    entry.fingerprint.size_bytes as i64,
                    payload,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        debug!(files = written, "scan cache persisted");
        Ok(written)
    }

    /// Load the persisted scan cache. Rows that no longer decode are skipped.
    pub fn load_scan(&self) -> CuratorResult<Vec<(Fingerprint, FileIndex)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path, mtime_ns, size_bytes, payload_json FROM scan_files ORDER BY path;",
        )?;
        let rows: Vec<(String, i64, i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<Result<_, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (path, mtime_ns, size_bytes, payload) in rows {
            match serde_json::from_str::<FileIndex>(&payload) {
                Ok(index) => entries.push((
                    Fingerprint {
                        mtime_ns,
                        size_bytes: size_bytes.max(0) as u64,
                    },
                    index,
                )),
                Err(e) => warn!(path = %path, "dropping undecodable cached scan row: {e}"),
            }
        }
        Ok(entries)
    }

    // -- context indexes -----------------------------------------------------

    pub fn save_context(&self, index: &ContextIndex) -> CuratorResult<()> {
        let conn = self.connect()?;
        let payload = serde_json::to_string(index)?;
        let status = if index.is_archived() { "archived" } else { "active" };
        conn.execute(
            "INSERT INTO context_indexes (ctx_id, task_id, status, created_at, updated_at, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(ctx_id) DO UPDATE SET \
                 status = excluded.status, \
                 updated_at = excluded.updated_at, \
                 payload_json = excluded.payload_json;",
            params![
                index.ctx_id,
                index.task_id,
                status,
                index.created_at.to_rfc3339(),
                index.updated_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Every persisted index in creation order.
    pub fn load_contexts(&self) -> CuratorResult<Vec<ContextIndex>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT ctx_id, payload_json FROM context_indexes ORDER BY created_at, ctx_id;",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        let mut indexes = Vec::with_capacity(rows.len());
        for (ctx_id, payload) in rows {
            match serde_json::from_str::<ContextIndex>(&payload) {
                Ok(index) => indexes.push(index),
                Err(e) => warn!(ctx_id = %ctx_id, "dropping undecodable context index: {e}"),
            }
        }
        Ok(indexes)
    }

    // -- change log ----------------------------------------------------------

    pub fn append_change_event(&self, record: &PropagationRecord) -> CuratorResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO change_events (seq, change_type, created_at, payload_json) \
             VALUES (?1, ?2, ?3, ?4);",
            params![
                record.seq as i64,
                record.event.change_type.as_str(),
                record.event.timestamp.to_rfc3339(),
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    pub fn load_change_events(&self) -> CuratorResult<Vec<PropagationRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT payload_json FROM change_events ORDER BY seq;")?;
        let rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(rows
            .iter()
            .filter_map(|payload| match serde_json::from_str(payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("dropping undecodable change event: {e}");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::propagator::{ChangeEvent, ChangeType};
    use chrono::Utc;
    use std::sync::Arc;

    fn file_index(path: &str) -> FileIndex {
        FileIndex {
            path: path.to_string(),
            content_hash: format!("hash-{path}"),
            elements: vec![],
            references: vec![],
            imports: vec![],
        }
    }

    #[test]
    fn test_open_creates_parent_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested/state.db")).unwrap();
        assert!(db.db_path().exists());
        assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_scan_cache_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("state.db")).unwrap();
        let first: Vec<CachedFile> = ["a.py", "b.py"]
            .iter()
            .map(|p| CachedFile {
                fingerprint: Fingerprint {
                    mtime_ns: 7,
                    size_bytes: 12,
                },
                index: Arc::new(file_index(p)),
            })
            .collect();
        assert_eq!(db.save_scan(&first).unwrap(), 2);
        assert_eq!(db.save_scan(first.iter().take(1)).unwrap(), 1);

        let loaded = db.load_scan().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.mtime_ns, 7);
        assert_eq!(loaded[0].0.size_bytes, 12);
        assert_eq!(loaded[0].1, file_index("a.py"));
    }

    #[test]
    fn test_context_upsert_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("state.db")).unwrap();
        let mut index = ContextIndex::new("TASK-9", Utc::now());
        index.focus_areas.insert("bar".to_string());
        db.save_context(&index).unwrap();
        index.pending_reevaluation = true;
        db.save_context(&index).unwrap();

        let loaded = db.load_contexts().unwrap();
        assert_eq!(loaded, vec![index]);
    }

    #[test]
    fn test_change_events_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("state.db")).unwrap();
        for seq in [2u64, 1] {
            db.append_change_event(&PropagationRecord {
                seq,
                event: ChangeEvent::new(ChangeType::FileModified, vec!["b.py".into()], "edit"),
                affected: vec![],
            })
            .unwrap();
        }
        let seqs: Vec<u64> = db
            .load_change_events()
            .unwrap()
            .iter()
            .map(|r| r.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
