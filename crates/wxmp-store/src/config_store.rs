//! Key/value config store.
//!
//! Rows live in a `<prefix>wechat` table keyed by `name`. The table is created
//! and seeded the first time any operation touches it, so opening a fresh
//! database never fails on a missing schema.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::{Result, StoreError};

pub const APPID: &str = "appid";
pub const APPSECRET: &str = "appsecret";
pub const ACCESS_TOKEN: &str = "access_token";
pub const ACCESS_TOKEN_EXPIRE_TIME: &str = "access_token_expire_time";
pub const QRCODE: &str = "qrcode";

/// Rows inserted when the table is created, with their descriptions.
const SEED_ROWS: [(&str, &str); 5] = [
    (APPID, "APPID"),
    (APPSECRET, "APP SECRET"),
    (ACCESS_TOKEN, "ACCESS TOKEN"),
    (ACCESS_TOKEN_EXPIRE_TIME, "ACCESS TOKEN expire time"),
    (QRCODE, "QR code"),
];

/// Durable name → value storage.
pub trait ConfigStore: Send + Sync + std::fmt::Debug {
    /// Read a single row. Missing rows and empty values are both `None`.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Write a row, creating it if needed.
    fn set(&self, name: &str, value: &str) -> Result<()>;

    /// All rows, empty values included.
    fn entries(&self) -> Result<BTreeMap<String, String>>;
}

/// Shared config store for use across async contexts.
pub type SharedConfigStore = Arc<dyn ConfigStore>;

struct Inner {
    conn: Connection,
    ready: bool,
}

/// SQLite-backed [`ConfigStore`].
pub struct SqliteConfigStore {
    inner: Mutex<Inner>,
    table: String,
}

impl std::fmt::Debug for SqliteConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConfigStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SqliteConfigStore {
    /// Open (or create) the database at `path`. The table is bootstrapped lazily.
    pub fn open(path: impl AsRef<Path>, table_prefix: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!(path = %path.display(), "config store opened");
        Self::with_connection(conn, table_prefix)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(table_prefix: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table_prefix)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> Result<Self> {
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::InvalidPrefix(table_prefix.to_string()));
        }

        Ok(Self {
            inner: Mutex::new(Inner { conn, ready: false }),
            table: format!("{}wechat", table_prefix),
        })
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run `f` against a connection whose table is known to exist.
    fn with_table<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if !inner.ready {
            self.bootstrap(&inner.conn)?;
            inner.ready = true;
        }
        f(&inner.conn)
    }

    fn bootstrap(&self, conn: &Connection) -> Result<()> {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if exists {
            return Ok(());
        }

        info!(table = %self.table, "config table missing, creating it");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                value TEXT DEFAULT NULL,
                description TEXT,
                updatetime INTEGER DEFAULT NULL
            );",
            self.table
        ))?;
        for (name, description) in SEED_ROWS {
            tx.execute(
                &format!(
                    "INSERT INTO {} (name, value, description) VALUES (?1, '', ?2)",
                    self.table
                ),
                params![name, description],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        self.with_table(|conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    &format!("SELECT value FROM {} WHERE name = ?1", self.table),
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten().filter(|v| !v.is_empty()))
        })
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        self.with_table(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (name, value, updatetime) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value,
                                                     updatetime = excluded.updatetime",
                    self.table
                ),
                params![name, value, now],
            )?;
            Ok(())
        })
    }

    fn entries(&self) -> Result<BTreeMap<String, String>> {
        self.with_table(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT name, COALESCE(value, '') FROM {} ORDER BY id",
                self.table
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut entries = BTreeMap::new();
            for row in rows {
                let (name, value) = row?;
                entries.insert(name, value);
            }
            Ok(entries)
        })
    }
}
