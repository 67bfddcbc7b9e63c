//! Authentication Module
//! Mission: Demo-credential login and header-based identity for the simulation

pub mod middleware;
pub mod models;
pub mod user_store;

pub use middleware::{admin_middleware, user_middleware, Identity};
pub use models::{LoginRequest, LoginResponse, User, UserResponse, UserRole};
pub use user_store::UserStore;
