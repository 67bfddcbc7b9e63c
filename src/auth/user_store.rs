//! User Storage
//! Mission: Store and manage user accounts with SQLite

use crate::auth::models::{derive_user_id, User, UserRole};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

/// The single demo trading account.
pub const DEMO_USERNAME: &str = "Victor";
const DEMO_PASSWORD: &str = "VictorVic";
const DEMO_BALANCE: f64 = 100_000_000.0; // 100 million EUR

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                balance REAL NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.create_demo_user(&conn)?;

        Ok(())
    }

    /// Seed the hardcoded demo account if it doesn't exist yet. Its id is
    /// derived from the username so the client can reconstruct it.
    fn create_demo_user(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1",
                params![DEMO_USERNAME],
                |row| row.get(0),
            )
            .context("Failed to check for demo user")?;

        if count == 0 {
            let password_hash =
                hash(DEMO_PASSWORD, DEFAULT_COST).context("Failed to hash password")?;

            let user = User {
                id: derive_user_id(DEMO_USERNAME),
                username: DEMO_USERNAME.to_string(),
                password_hash,
                role: UserRole::Admin,
                balance: DEMO_BALANCE,
                created_at: Utc::now().to_rfc3339(),
            };

            self.insert_user(conn, &user)?;
            info!("🔐 Demo user created (username: {})", DEMO_USERNAME);
        }

        Ok(())
    }

    fn insert_user(&self, conn: &Connection, user: &User) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, balance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.role.as_str(),
                user.balance,
                user.created_at,
            ],
        )
        .context("Failed to insert user")?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        let id: String = row.get(0)?;
        let role_str: String = row.get(3)?;
        Ok(User {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            username: row.get(1)?,
            password_hash: row.get(2)?,
            role: UserRole::from_str(&role_str).unwrap_or(UserRole::Trader),
            balance: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Get user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, balance, created_at
             FROM users WHERE username = ?1",
        )?;

        match stmt.query_row(params![username], Self::row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get user by id
    pub fn get_user(&self, user_id: &Uuid) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, balance, created_at
             FROM users WHERE id = ?1",
        )?;

        match stmt.query_row(params![user_id.to_string()], Self::row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify username and password
    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid)
            }
            None => Ok(false),
        }
    }

    /// Overwrite a user's balance (last-writer-wins, single-user state).
    pub fn update_balance(&self, user_id: &Uuid, new_balance: f64) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        let rows = conn.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![new_balance, user_id.to_string()],
        )?;

        if rows == 0 {
            anyhow::bail!("User not found");
        }

        Ok(())
    }

    /// Create a new user (admin console)
    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("Failed to hash password")?;

        let user = User {
            id: derive_user_id(username),
            username: username.to_string(),
            password_hash,
            role,
            balance: 0.0,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = Connection::open(&self.db_path)?;
        self.insert_user(&conn, &user)?;

        info!("✅ Created user: {} ({})", user.username, user.role.as_str());

        Ok(user)
    }

    /// List all users (admin console)
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, balance, created_at FROM users",
        )?;

        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Delete a user by ID (admin console)
    pub fn delete_user(&self, user_id: &Uuid) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        let rows_affected = conn.execute(
            "DELETE FROM users WHERE id = ?1",
            params![user_id.to_string()],
        )?;

        if rows_affected == 0 {
            anyhow::bail!("User not found");
        }

        info!("🗑️  Deleted user: {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn test_demo_user_created() {
        let (store, _temp) = create_test_store();

        let user = store.get_user_by_username(DEMO_USERNAME).unwrap().unwrap();
        assert_eq!(user.username, DEMO_USERNAME);
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(user.balance, DEMO_BALANCE);
        assert_eq!(user.id, derive_user_id(DEMO_USERNAME));
    }

    #[test]
    fn test_password_verification() {
        let (store, _temp) = create_test_store();

        assert!(store.verify_password(DEMO_USERNAME, DEMO_PASSWORD).unwrap());
        assert!(!store
            .verify_password(DEMO_USERNAME, "wrongpassword")
            .unwrap());
        assert!(!store.verify_password("nonexistent", "password").unwrap());
    }

    #[test]
    fn test_balance_update_persists() {
        let (store, _temp) = create_test_store();
        let user = store.get_user_by_username(DEMO_USERNAME).unwrap().unwrap();

        store.update_balance(&user.id, 99_000.0).unwrap();

        let reloaded = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(reloaded.balance, 99_000.0);
    }

    #[test]
    fn test_create_list_delete_user() {
        let (store, _temp) = create_test_store();

        let trader = store
            .create_user("trader1", "password123", UserRole::Trader)
            .unwrap();
        assert_eq!(trader.id, derive_user_id("trader1"));

        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 2); // demo user + trader1

        store.delete_user(&trader.id).unwrap();
        assert!(store.get_user_by_username("trader1").unwrap().is_none());
    }
}
