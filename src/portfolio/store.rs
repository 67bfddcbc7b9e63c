//! Flat key-value persistence for per-user trading state.
//!
//! The browser client kept portfolio, transactions, emissions, and the
//! activity log as JSON blobs under user-scoped keys. This store keeps the
//! exact same shape in SQLite: one `kv` table, keys like
//! `portfolio-<uuid>`, values opaque JSON. No schema versioning, last
//! writer wins.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::models::{Activity, Co2Emissions, Portfolio, Transaction};

pub struct BlobStore {
    db_path: String,
}

const ACTIVITY_KEY: &str = "activity-history";

impl BlobStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;

        match stmt.query_row(params![key], |row| row.get::<_, String>(0)) {
            Ok(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt blob under key {key}"))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).context("failed to serialize blob")?;
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, raw, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_portfolio(&self, user_id: &Uuid) -> Result<Option<Portfolio>> {
        self.get_json(&format!("portfolio-{user_id}"))
    }

    pub fn save_portfolio(&self, user_id: &Uuid, portfolio: &Portfolio) -> Result<()> {
        self.put_json(&format!("portfolio-{user_id}"), portfolio)
    }

    pub fn load_transactions(&self, user_id: &Uuid) -> Result<Option<Vec<Transaction>>> {
        self.get_json(&format!("transactions-{user_id}"))
    }

    pub fn save_transactions(&self, user_id: &Uuid, transactions: &[Transaction]) -> Result<()> {
        self.put_json(&format!("transactions-{user_id}"), &transactions)
    }

    pub fn load_emissions(&self, user_id: &Uuid) -> Result<Option<Co2Emissions>> {
        self.get_json(&format!("emissions-{user_id}"))
    }

    pub fn save_emissions(&self, user_id: &Uuid, emissions: &Co2Emissions) -> Result<()> {
        self.put_json(&format!("emissions-{user_id}"), emissions)
    }

    /// The activity log is market-wide: one list, filtered per user on read.
    pub fn load_activity(&self) -> Result<Option<Vec<Activity>>> {
        self.get_json(ACTIVITY_KEY)
    }

    pub fn save_activity(&self, activity: &[Activity]) -> Result<()> {
        self.put_json(ACTIVITY_KEY, &activity)
    }
}
