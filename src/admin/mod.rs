//! Admin console backing store: access requests and platform config.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl AccessRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRequestStatus::Pending => "pending",
            AccessRequestStatus::Approved => "approved",
            AccessRequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AccessRequestStatus::Pending),
            "approved" => Some(AccessRequestStatus::Approved),
            "rejected" => Some(AccessRequestStatus::Rejected),
            _ => None,
        }
    }
}

/// A prospective customer's request for platform access.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRequest {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub message: Option<String>,
    pub status: AccessRequestStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccessRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub message: Option<String>,
}

/// One platform configuration entry.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// SQLite store behind the admin console.
pub struct AdminStore {
    db_path: String,
}

impl AdminStore {
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
            "CREATE TABLE IF NOT EXISTS access_requests (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                company TEXT,
                message TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                decided_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS platform_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Defaults the admin screen expects to find on first boot.
        let now = Utc::now().to_rfc3339();
        for (key, value) in [
            ("maintenance_mode", "false"),
            ("conversion_fee_eur", "2"),
            ("registration_open", "true"),
        ] {
            conn.execute(
                "INSERT OR IGNORE INTO platform_config (key, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )?;
        }

        Ok(())
    }

    pub fn create_access_request(&self, request: &NewAccessRequest) -> Result<AccessRequest> {
        if request.name.trim().is_empty() || request.email.trim().is_empty() {
            anyhow::bail!("name and email are required");
        }

        let record = AccessRequest {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            company: request.company.clone(),
            message: request.message.clone(),
            status: AccessRequestStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO access_requests
                (id, name, email, company, message, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.name,
                record.email,
                record.company,
                record.message,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )?;

        info!(email = %record.email, "access request received");
        Ok(record)
    }

    pub fn list_access_requests(&self) -> Result<Vec<AccessRequest>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, email, company, message, status, created_at, decided_at
             FROM access_requests ORDER BY created_at DESC",
        )?;

        let requests = stmt
            .query_map([], |row| {
                Ok(AccessRequest {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                    name: row.get(1)?,
                    email: row.get(2)?,
                    company: row.get(3)?,
                    message: row.get(4)?,
                    status: AccessRequestStatus::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or(AccessRequestStatus::Pending),
                    created_at: parse_datetime(row.get(6)?).unwrap_or_else(Utc::now),
                    decided_at: parse_datetime(row.get(7)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(requests)
    }

    /// Approve or reject a pending request. Returns false when no such
    /// request exists.
    pub fn decide_access_request(
        &self,
        id: &Uuid,
        status: AccessRequestStatus,
    ) -> Result<bool> {
        let conn = Connection::open(&self.db_path)?;
        let rows = conn.execute(
            "UPDATE access_requests SET status = ?1, decided_at = ?2 WHERE id = ?3",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn list_config(&self) -> Result<Vec<ConfigEntry>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt =
            conn.prepare("SELECT key, value, updated_at FROM platform_config ORDER BY key")?;

        let entries = stmt
            .query_map([], |row| {
                Ok(ConfigEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: parse_datetime(row.get(2)?).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = Connection::open(&self.db_path)?;
        conn.query_row(
            "SELECT value FROM platform_config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read config entry")
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO platform_config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn parse_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_store() -> (AdminStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = AdminStore::new(temp.path().to_str().unwrap()).unwrap();
        (store, temp)
    }

    #[test]
    fn test_access_request_lifecycle() {
        let (store, _temp) = test_store();

        let created = store
            .create_access_request(&NewAccessRequest {
                name: "Jia Wei".to_string(),
                email: "jia@example.com".to_string(),
                company: Some("Wei Industrial".to_string()),
                message: None,
            })
            .unwrap();
        assert_eq!(created.status, AccessRequestStatus::Pending);

        assert!(store
            .decide_access_request(&created.id, AccessRequestStatus::Approved)
            .unwrap());

        let listed = store.list_access_requests().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, AccessRequestStatus::Approved);
        assert!(listed[0].decided_at.is_some());

        // Unknown ids report false instead of erroring.
        assert!(!store
            .decide_access_request(&Uuid::new_v4(), AccessRequestStatus::Rejected)
            .unwrap());
    }

    #[test]
    fn test_blank_access_request_rejected() {
        let (store, _temp) = test_store();
        let result = store.create_access_request(&NewAccessRequest {
            name: "  ".to_string(),
            email: "".to_string(),
            company: None,
            message: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_defaults_and_overwrite() {
        let (store, _temp) = test_store();

        assert_eq!(
            store.get_config("maintenance_mode").unwrap().as_deref(),
            Some("false")
        );

        store.set_config("maintenance_mode", "true").unwrap();
        assert_eq!(
            store.get_config("maintenance_mode").unwrap().as_deref(),
            Some("true")
        );

        let entries = store.list_config().unwrap();
        assert!(entries.iter().any(|e| e.key == "conversion_fee_eur"));
    }
}
