//! vjudge Core - Domain models, configuration and the credential store
//!
//! This crate defines the abstractions shared by the API service:
//! - User accounts and their public identifiers
//! - Common error types
//! - Configuration management
//! - The `UserStore` trait and its PostgreSQL implementation

pub mod config;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, RedisConfig, ServerConfig,
    UidPoolConfig,
};
pub use store::{NewUser, PgUserStore, UserStore};

#[cfg(any(test, feature = "test-utils"))]
pub use store::MemoryUserStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for vjudge operations
#[derive(Error, Debug)]
pub enum VjError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// A unique constraint rejected the write. `constraint` carries the
    /// database constraint name when the backend reports one.
    #[error("Unique constraint violated on {field}")]
    UniqueViolation {
        field: String,
        constraint: Option<String>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VjError {
    /// True when the error is a uniqueness violation on the given column
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, VjError::UniqueViolation { field, .. } if field == column)
    }
}

pub type Result<T> = std::result::Result<T, VjError>;

// ============================================================================
// Public user identifier
// ============================================================================

/// Length of a public user identifier
pub const UID_LENGTH: usize = 10;

/// Check whether `value` is a well-formed public identifier of `len` digits
pub fn is_valid_uid(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// Users
// ============================================================================

/// Self-declared gender, stored as a small integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "i32", try_from = "i32")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl From<Gender> for i32 {
    fn from(gender: Gender) -> Self {
        match gender {
            Gender::Male => 0,
            Gender::Female => 1,
            Gender::Unknown => 2,
        }
    }
}

impl TryFrom<i32> for Gender {
    type Error = VjError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Gender::Male),
            1 => Ok(Gender::Female),
            2 => Ok(Gender::Unknown),
            other => Err(VjError::ValidationError(format!("unknown gender code {other}"))),
        }
    }
}

/// Default avatar reference for new accounts
pub const DEFAULT_AVATAR: &str = "default.png";

/// A user account
///
/// `uid` is the public identifier: fixed-length numeric, unique and immutable
/// once assigned. `email` is the login subject carried by bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Internal primary key
    pub id: i64,
    /// Public identifier
    pub uid: String,
    pub email: String,
    /// Argon2id PHC string, never serialized
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nick_name: Option<String>,
    pub phone: Option<String>,
    pub gender: Gender,
    pub avatar: String,
    pub is_admin: bool,
    pub is_active: bool,
    /// Present in the schema; no read path filters on it yet
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl User {
    /// Whether this account may act on the account with primary key `target_id`
    pub fn can_manage(&self, target_id: i64) -> bool {
        self.is_admin || self.id == target_id
    }
}
