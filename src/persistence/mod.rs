//! Durable key-value backend for semantic contexts.
//!
//! Provides the `KeyValueStore` trait (abstract base) and two concrete
//! implementations: `SqliteKeyValueStore` for durable storage and
//! `InMemoryKeyValueStore` for tests. Entries carry an expiry timestamp;
//! expired entries are dropped lazily on read.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Abstract base trait for the key-value backend.
///
/// Values are JSON blobs; every write takes a time-to-live after which the
/// entry is no longer visible. Index operations maintain one-to-many sets
/// (session id → workflow ids) alongside plain entries.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Initialize the backend (create tables, indexes).
    fn init_db(&self) -> Result<(), anyhow::Error>;

    /// Store `value` under `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), anyhow::Error>;

    /// Fetch the value under `key`, or None if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>, anyhow::Error>;

    /// Remove the entry under `key`, if any.
    fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    /// Reset the expiry of an existing entry.
    fn expire(&self, key: &str, ttl: Duration) -> Result<(), anyhow::Error>;

    /// Add `member` to the set stored under `key`, expiring after `ttl`.
    fn index_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), anyhow::Error>;

    /// Read the unexpired members of the set stored under `key`.
    fn index_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error>;
}

fn expiry_from(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365))
}

/// SQLite-based implementation of the key-value backend.
///
/// Suitable for development, testing, or production use cases with moderate
/// performance requirements. The connection is guarded by a mutex.
#[derive(Debug)]
pub struct SqliteKeyValueStore {
    /// Path to the SQLite database file.
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the database at `db_path`. If None, uses
    /// `semantic_contexts.db` in the current directory.
    pub fn new(db_path: Option<String>) -> Result<Self, anyhow::Error> {
        let path = db_path.unwrap_or_else(|| "semantic_contexts.db".to_string());

        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let store = Self {
            db_path: path,
            conn: Mutex::new(conn),
        };
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, anyhow::Error> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn init_db(&self) -> Result<(), anyhow::Error> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL,
                expires_at DATETIME NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_index (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                expires_at DATETIME NOT NULL,
                UNIQUE(key, member)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kv_index_key ON kv_index(key)",
            [],
        )?;

        Ok(())
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), anyhow::Error> {
        let conn = self.lock()?;
        let value_json = serde_json::to_string(value)?;
        let expires_at = expiry_from(ttl).to_rfc3339();

        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value_json, expires_at)
             VALUES (?1, ?2, ?3)",
            params![key, value_json, expires_at],
        )?;

        log::debug!("SqliteKeyValueStore::set: key={}", key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, anyhow::Error> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT value_json, expires_at FROM kv_entries WHERE key = ?1",
        )?;
        let row: Option<(String, String)> = stmt
            .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok();

        match row {
            Some((value_json, expires_at)) => {
                let expires = DateTime::parse_from_rfc3339(&expires_at)
                    .map_err(|e| anyhow::anyhow!("Bad expiry timestamp: {}", e))?;
                if expires.with_timezone(&Utc) <= Utc::now() {
                    // Expired, drop lazily.
                    conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
                    return Ok(None);
                }
                let value: Value = serde_json::from_str(&value_json)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let conn = self.lock()?;
        let expires_at = expiry_from(ttl).to_rfc3339();
        conn.execute(
            "UPDATE kv_entries SET expires_at = ?2 WHERE key = ?1",
            params![key, expires_at],
        )?;
        Ok(())
    }

    fn index_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let conn = self.lock()?;
        let expires_at = expiry_from(ttl).to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO kv_index (key, member, expires_at)
             VALUES (?1, ?2, ?3)",
            params![key, member, expires_at],
        )?;
        Ok(())
    }

    fn index_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "DELETE FROM kv_index WHERE key = ?1 AND expires_at <= ?2",
            params![key, now],
        )?;

        let mut stmt = conn.prepare(
            "SELECT member FROM kv_index WHERE key = ?1 ORDER BY rowid",
        )?;
        let members = stmt
            .query_map(params![key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(members)
    }
}

/// In-memory implementation of the key-value backend, for tests and
/// single-process use without durability.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, (Value, DateTime<Utc>)>,
    indexes: DashMap<String, Vec<(String, DateTime<Utc>)>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn init_db(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), anyhow::Error> {
        self.entries
            .insert(key.to_string(), (value.clone(), expiry_from(ttl)));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, anyhow::Error> {
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > Utc::now() {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.entries.remove(key);
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.1 = expiry_from(ttl);
        }
        Ok(())
    }

    fn index_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut members = self.indexes.entry(key.to_string()).or_default();
        members.retain(|(m, _)| m != member);
        members.push((member.to_string(), expiry_from(ttl)));
        Ok(())
    }

    fn index_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        let now = Utc::now();
        Ok(self
            .indexes
            .get(key)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, expires)| *expires > now)
                    .map(|(m, _)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
