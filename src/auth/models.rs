//! Authentication Models
//! Mission: Define user account and identity data structures

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    /// Available trading balance in EUR.
    pub balance: f64,
    pub created_at: String,
}

/// User roles for RBAC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // Full access including the admin console
    #[serde(rename = "trader")]
    Trader, // Market + portfolio + KYC operations
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Trader => "trader",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "trader" => Some(UserRole::Trader),
            _ => None,
        }
    }
}

/// The authenticated identity is not a token: it is a UUID derived
/// deterministically from the username, sent back by the client in the
/// `X-User-ID` / `X-Admin-ID` headers on every request.
pub fn derive_user_id(username: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes())
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub balance: f64,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            role: user.role.clone(),
            balance: user.balance,
            created_at: user.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_serialization() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let trader: UserRole = serde_json::from_str(r#""trader""#).unwrap();
        assert_eq!(trader, UserRole::Trader);
    }

    #[test]
    fn test_derived_id_is_deterministic() {
        let a = derive_user_id("Victor");
        let b = derive_user_id("Victor");
        let c = derive_user_id("victor");

        assert_eq!(a, b);
        assert_ne!(a, c); // usernames are case-sensitive identities
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            username: "test".to_string(),
            password_hash: "secret-hash".to_string(),
            role: UserRole::Trader,
            balance: 100.0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
