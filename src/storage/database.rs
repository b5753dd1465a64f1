//! SQLite-backed store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Installation state of a plugin as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub enabled: bool,
}

/// Persistent store shared by the plugin manager and plugins.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database file at `path`.
    ///
    /// Parent directories are created as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let db = Self::from_connection(conn)?;
        info!("Database initialized: {}", path.display());
        Ok(db)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // Permissions

    pub fn add_sudo(&self, user_id: i64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO permissions (user_id, is_sudo) VALUES (?1, 1)
             ON CONFLICT(user_id) DO UPDATE SET is_sudo = 1",
            [user_id],
        )?;
        Ok(())
    }

    pub fn remove_sudo(&self, user_id: i64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE permissions SET is_sudo = 0 WHERE user_id = ?1",
            [user_id],
        )?;
        Ok(())
    }

    pub fn is_sudo(&self, user_id: i64) -> Result<bool, StoreError> {
        let flag: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT is_sudo FROM permissions WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag == Some(1))
    }

    pub fn get_sudo_list(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT user_id FROM permissions WHERE is_sudo = 1 ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    // Plugins

    /// Records an installed plugin and its version, keeping its enablement.
    pub fn save_plugin(&self, name: &str, version: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO plugins (name, version) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET version = excluded.version",
            params![name, version],
        )?;
        Ok(())
    }

    pub fn remove_plugin(&self, name: &str) -> Result<bool, StoreError> {
        let rows = self
            .conn()?
            .execute("DELETE FROM plugins WHERE name = ?1", [name])?;
        Ok(rows > 0)
    }

    /// Plugins never recorded in the store count as disabled.
    pub fn is_plugin_enabled(&self, name: &str) -> Result<bool, StoreError> {
        let flag: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT enabled FROM plugins WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag == Some(1))
    }

    pub fn enable_plugin(&self, name: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO plugins (name, enabled) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET enabled = 1,
                 installed_at = strftime('%s', 'now')",
            [name],
        )?;
        Ok(())
    }

    pub fn disable_plugin(&self, name: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("UPDATE plugins SET enabled = 0 WHERE name = ?1", [name])?;
        Ok(())
    }

    pub fn list_plugins(&self) -> Result<Vec<PluginRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, version, enabled FROM plugins ORDER BY name")?;
        let records = stmt
            .query_map([], |row| {
                Ok(PluginRecord {
                    name: row.get(0)?,
                    version: row
                        .get::<_, Option<String>>(1)?
                        .unwrap_or_else(|| "1.0.0".to_owned()),
                    enabled: row.get::<_, i64>(2)? == 1,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // Aliases

    pub fn set_alias(&self, alias: &str, command: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO aliases (alias, command) VALUES (?1, ?2)",
            params![alias, command],
        )?;
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> Result<bool, StoreError> {
        let rows = self
            .conn()?
            .execute("DELETE FROM aliases WHERE alias = ?1", [alias])?;
        Ok(rows > 0)
    }

    pub fn get_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        let command = self
            .conn()?
            .query_row(
                "SELECT command FROM aliases WHERE alias = ?1",
                [alias],
                |row| row.get(0),
            )
            .optional()?;
        Ok(command)
    }

    pub fn get_all_aliases(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT alias, command FROM aliases")?;
        let aliases = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(aliases)
    }

    // Key/value

    /// Stores `value` as JSON under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![key, json],
        )?;
        Ok(())
    }

    /// Reads the JSON value under `key`.
    ///
    /// A value that no longer decodes as `T` is reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .conn()?
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to decode stored value for key {}: {}", key, e);
                None
            }
        }))
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let rows = self
            .conn()?
            .execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS permissions (
            user_id INTEGER PRIMARY KEY,
            is_sudo INTEGER NOT NULL DEFAULT 0,
            is_whitelist INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS plugins (
            name TEXT PRIMARY KEY,
            version TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            config TEXT,
            installed_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS aliases (
            alias TEXT PRIMARY KEY,
            command TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
}
