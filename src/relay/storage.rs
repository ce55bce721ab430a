// Persistent mission history using SQLite

use crate::relay::error::StoreError;
use crate::relay::message::HistoryEntry;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Storage key under which each mission partition keeps its history list
pub const HISTORY_KEY: &str = "history";

/// Durable, ordered per-mission message log
pub trait HistoryStore: Send + Sync {
    /// Append one entry to the end of the mission's history
    fn append(&self, mission_id: &str, entry: &HistoryEntry) -> Result<(), StoreError>;

    /// Read the mission's history in append order
    fn history(&self, mission_id: &str) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// SQLite-backed key/value storage partitioned by mission id.
///
/// Each mission's history lives as a single JSON list under [`HISTORY_KEY`],
/// read, extended and rewritten as a whole value.
pub struct SqliteHistoryStore {
    db_path: PathBuf,
}

impl SqliteHistoryStore {
    /// Open (or create) the store under `base_dir`
    pub fn new(base_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(base_dir)?;

        let store = Self {
            db_path: base_dir.join("history.db"),
        };

        store.initialize_db()?;

        tracing::debug!("History store opened at {:?}", store.db_path);

        Ok(store)
    }

    /// Path of the underlying database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_connection(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn initialize_db(&self) -> Result<(), StoreError> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS storage (
                partition TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (partition, key)
            )",
            [],
        )?;

        Ok(())
    }

    /// Get a raw value from a partition
    fn get(conn: &Connection, partition: &str, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row(
                "SELECT value FROM storage WHERE partition = ?1 AND key = ?2",
                params![partition, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Put a raw value into a partition, replacing any previous one
    fn put(conn: &Connection, partition: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let updated_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        conn.execute(
            "INSERT INTO storage (partition, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (partition, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![partition, key, value, updated_at],
        )?;

        Ok(())
    }

    fn decode(value: Option<String>) -> Result<Vec<HistoryEntry>, StoreError> {
        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// List mission ids that have any recorded history
    pub fn missions(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            "SELECT partition FROM storage WHERE key = ?1 ORDER BY partition",
        )?;

        let missions = stmt
            .query_map(params![HISTORY_KEY], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(missions)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, mission_id: &str, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut history = Self::decode(Self::get(&tx, mission_id, HISTORY_KEY)?)?;
        history.push(entry.clone());

        let encoded = serde_json::to_string(&history)?;
        Self::put(&tx, mission_id, HISTORY_KEY, &encoded)?;

        tx.commit()?;

        tracing::debug!(
            "Mission {} history now has {} entries",
            mission_id,
            history.len()
        );

        Ok(())
    }

    fn history(&self, mission_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.get_connection()?;
        Self::decode(Self::get(&conn, mission_id, HISTORY_KEY)?)
    }
}
