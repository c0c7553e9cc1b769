use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{DiagnosticEntry, DiagnosticSink, parse_id};
use crate::Result;

/// Diagnostic entries in an indexed SQLite table.
pub struct SqliteDiagnosticLog {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteDiagnosticLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDiagnosticLog").finish_non_exhaustive()
    }
}

impl SqliteDiagnosticLog {
    /// Open (or create) the log at `path`. May share a file with the config store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    /// Open an in-memory log (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS diagnostics (
                id TEXT PRIMARY KEY,
                recorded_at TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_diagnostics_recorded_at
                ON diagnostics(recorded_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete entries older than `retention_days`. Returns the number removed.
    pub fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let removed = self.conn.lock().execute(
            "DELETE FROM diagnostics WHERE recorded_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        if removed > 0 {
            tracing::info!(removed, "pruned expired diagnostic entries");
        }
        Ok(removed)
    }
}

impl DiagnosticSink for SqliteDiagnosticLog {
    fn append(&self, entry: &DiagnosticEntry) -> Result<()> {
        let data = serde_json::to_string(&entry.data)?;
        self.conn.lock().execute(
            "INSERT INTO diagnostics (id, recorded_at, name, data) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id, entry.recorded_at.to_rfc3339(), entry.name, data],
        )?;
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<DiagnosticEntry>> {
        parse_id(id)?;

        let row: Option<(String, String, String)> = self
            .conn
            .lock()
            .query_row(
                "SELECT recorded_at, name, data FROM diagnostics WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((recorded_at, name, data)) = row else {
            return Ok(None);
        };

        Ok(Some(DiagnosticEntry {
            id: id.to_string(),
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            name,
            data: serde_json::from_str(&data)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_fetch() {
        let log = SqliteDiagnosticLog::open_in_memory().unwrap();
        let data = json!({"url": "https://x", "response": {"errcode": 45009}});
        let id = log.record("platform call failed", data).unwrap();

        let entry = log.fetch(&id).unwrap().unwrap();
        assert_eq!(entry.name, "platform call failed");
        assert_eq!(entry.data["response"]["errcode"], 45009);
    }

    #[test]
    fn test_fetch_unknown_id() {
        let log = SqliteDiagnosticLog::open_in_memory().unwrap();
        let missing = format!("{}{}", Utc::now().format("%Y%m%d"), "0".repeat(32));
        assert!(log.fetch(&missing).unwrap().is_none());
        assert!(log.fetch("nope").is_err());
    }

    #[test]
    fn test_prune_removes_old_entries() {
        let log = SqliteDiagnosticLog::open_in_memory().unwrap();
        let mut old = DiagnosticEntry::new("old", json!(null));
        old.recorded_at = Utc::now() - chrono::Duration::days(120);
        log.append(&old).unwrap();
        let fresh = log.record("fresh", json!(null)).unwrap();

        assert_eq!(log.prune(90).unwrap(), 1);
        assert!(log.fetch(&old.id).unwrap().is_none());
        assert!(log.fetch(&fresh).unwrap().is_some());
    }

    #[test]
    fn test_shares_file_with_config_store() {
        use crate::{ConfigStore, SqliteConfigStore};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wxmp.db");
        let store = SqliteConfigStore::open(&path, "").unwrap();
        let log = SqliteDiagnosticLog::open(&path).unwrap();

        store.set("appid", "wx1").unwrap();
        let id = log.record("entry", json!({"a": 1})).unwrap();
        assert!(log.fetch(&id).unwrap().is_some());
        assert_eq!(store.get("appid").unwrap().as_deref(), Some("wx1"));
    }
}
