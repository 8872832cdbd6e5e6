//! SQLite-based state store.
//!
//! Keeps one row per persisted key, mirroring the flat key-value layout the
//! client has always used: `counter`, `balance`, `wallet_id`,
//! `session_active` and `outbox`. Values are JSON text.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::lock::StateLock;
use crate::store::{Snapshot, StateStore};
use stepsync_common::{Error, LocalState, Result};

const KEY_COUNTER: &str = "counter";
const KEY_BALANCE: &str = "balance";
const KEY_WALLET_ID: &str = "wallet_id";
const KEY_SESSION_ACTIVE: &str = "session_active";
const KEY_OUTBOX: &str = "outbox";

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

/// State store backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    _lock: Option<StateLock>,
}

impl SqliteStore {
    /// Create or open a state database, locking it for this store.
    ///
    /// # Errors
    /// - `Locked` if another store has the database open
    /// - Database creation or schema setup failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let lock = StateLock::acquire(db_path.as_ref())?;
        let conn = Connection::open(db_path).map_err(db_err)?;
        Self::with_connection(conn, Some(lock))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, lock: Option<StateLock>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS local_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;

        info!("State database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            _lock: lock,
        })
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM local_state")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err)?;

        let mut values = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(db_err)?;
            values.insert(key, value);
        }
        Ok(values)
    }
}

fn decode<T: DeserializeOwned + Default>(values: &HashMap<String, String>, key: &str) -> Result<T> {
    match values.get(key) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| Error::Serialization(format!("Corrupt value for '{}': {}", key, e))),
        None => Ok(T::default()),
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self) -> Result<Snapshot> {
        let values = self.read_all()?;

        let state = LocalState {
            counter: decode(&values, KEY_COUNTER)?,
            balance: decode(&values, KEY_BALANCE)?,
            wallet_id: decode(&values, KEY_WALLET_ID)?,
            session_active: decode(&values, KEY_SESSION_ACTIVE)?,
        };
        let outbox = decode(&values, KEY_OUTBOX)?;

        Ok(Snapshot { state, outbox })
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let entries = [
            (KEY_COUNTER, serde_json::to_string(&snapshot.state.counter)?),
            (KEY_BALANCE, serde_json::to_string(&snapshot.state.balance)?),
            (KEY_WALLET_ID, serde_json::to_string(&snapshot.state.wallet_id)?),
            (
                KEY_SESSION_ACTIVE,
                serde_json::to_string(&snapshot.state.session_active)?,
            ),
            (KEY_OUTBOX, serde_json::to_string(&snapshot.outbox)?),
        ];

        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))?;

        let tx = conn.transaction().map_err(db_err)?;
        for (key, value) in &entries {
            tx.execute(
                "INSERT OR REPLACE INTO local_state (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;

        debug!("Saved state ({} pending)", snapshot.outbox.len());
        Ok(())
    }
}
