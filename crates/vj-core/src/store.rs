//! Credential store
//!
//! User accounts live in PostgreSQL. The `UserStore` trait is the seam the
//! API service depends on; `PgUserStore` is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::info;

use crate::{DatabaseConfig, Gender, Result, User, VjError, DEFAULT_AVATAR};

/// Fields required to create an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub nick_name: Option<String>,
    pub phone: Option<String>,
    pub is_admin: bool,
}

/// Trait for account persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find an account by login email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find an account by public identifier
    async fn get_by_uid(&self, uid: &str) -> Result<Option<User>>;

    /// Find an account by primary key
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Insert a new account. Uniqueness failures surface as
    /// `VjError::UniqueViolation` naming the offending column.
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Persist mutable fields of an existing account
    async fn save(&self, user: &User) -> Result<User>;

    /// Round-trip to the backend
    async fn health_check(&self) -> Result<()>;
}

/// PostgreSQL credential store
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new store connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| VjError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;
        info!(max_connections = config.max_connections, "PostgreSQL pool ready");

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    uid: String,
    email: String,
    password_hash: String,
    nick_name: Option<String>,
    phone: Option<String>,
    gender: i32,
    avatar: String,
    is_admin: bool,
    is_active: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            uid: row.uid,
            email: row.email,
            password_hash: row.password_hash,
            nick_name: row.nick_name,
            phone: row.phone,
            gender: Gender::try_from(row.gender).unwrap_or_default(),
            avatar: row.avatar,
            is_admin: row.is_admin,
            is_active: row.is_active,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

const USER_COLUMNS: &str = "id, uid, email, password_hash, nick_name, phone, gender, avatar, \
                            is_admin, is_active, is_deleted, created_at, modified_at";

/// Translate a write failure, keeping unique violations distinguishable
fn map_write_error(e: sqlx::Error, action: &str) -> VjError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            let constraint = db.constraint().map(str::to_string);
            let field = match constraint.as_deref() {
                Some(c) if c.contains("uid") => "uid",
                Some(c) if c.contains("email") => "email",
                _ => "unknown",
            };
            return VjError::UniqueViolation {
                field: field.to_string(),
                constraint,
            };
        }
    }
    VjError::DatabaseError(format!("Failed to {action}: {e}"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| VjError::DatabaseError(format!("Failed to get user: {e}")))?;

        Ok(row.map(User::from))
    }

    async fn get_by_uid(&self, uid: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE uid = $1"))
                .bind(uid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| VjError::DatabaseError(format!("Failed to get user: {e}")))?;

        Ok(row.map(User::from))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| VjError::DatabaseError(format!("Failed to get user: {e}")))?;

        Ok(row.map(User::from))
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (
                uid, email, password_hash, nick_name, phone,
                gender, avatar, is_admin, is_active, is_deleted
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, FALSE)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.uid)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.nick_name)
        .bind(&user.phone)
        .bind(i32::from(Gender::default()))
        .bind(DEFAULT_AVATAR)
        .bind(user.is_admin)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "create user"))?;

        Ok(row.into())
    }

    async fn save(&self, user: &User) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                email = $2,
                password_hash = $3,
                nick_name = $4,
                phone = $5,
                gender = $6,
                avatar = $7,
                is_admin = $8,
                is_active = $9,
                modified_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.nick_name)
        .bind(&user.phone)
        .bind(i32::from(user.gender))
        .bind(&user.avatar)
        .bind(user.is_admin)
        .bind(user.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "update user"))?;

        row.map(User::from)
            .ok_or_else(|| VjError::NotFound(format!("user {}", user.id)))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| VjError::DatabaseError(format!("Health check failed: {e}")))?;
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory `UserStore` with the same uniqueness rules as the schema.
    ///
    /// `set_available(false)` makes every call fail with a database error.
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: Mutex<Vec<User>>,
        unavailable: AtomicBool,
        uid_lookups: AtomicUsize,
    }

    impl MemoryUserStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_available(&self, available: bool) {
            self.unavailable.store(!available, Ordering::SeqCst);
        }

        /// Number of `get_by_uid` calls served so far
        pub fn uid_lookups(&self) -> usize {
            self.uid_lookups.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.lock().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<User>> {
            // A poisoned lock only means a test panicked mid-update
            self.users.lock().unwrap_or_else(|p| p.into_inner())
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(VjError::DatabaseError("store unavailable".to_string()));
            }
            Ok(())
        }

        fn find(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>> {
            self.check_available()?;
            Ok(self.lock().iter().find(|u| pred(u)).cloned())
        }
    }

    fn violation(field: &str) -> VjError {
        VjError::UniqueViolation {
            field: field.to_string(),
            constraint: Some(format!("users_{field}_key")),
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
            self.find(|u| u.email == email)
        }

        async fn get_by_uid(&self, uid: &str) -> Result<Option<User>> {
            self.uid_lookups.fetch_add(1, Ordering::SeqCst);
            self.find(|u| u.uid == uid)
        }

        async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
            self.find(|u| u.id == id)
        }

        async fn create(&self, new: NewUser) -> Result<User> {
            self.check_available()?;
            let mut users = self.lock();
            if users.iter().any(|u| u.uid == new.uid) {
                return Err(violation("uid"));
            }
            if users.iter().any(|u| u.email == new.email) {
                return Err(violation("email"));
            }

            let now = Utc::now();
            let user = User {
                id: users.len() as i64 + 1,
                uid: new.uid,
                email: new.email,
                password_hash: new.password_hash,
                nick_name: new.nick_name,
                phone: new.phone,
                gender: Gender::default(),
                avatar: DEFAULT_AVATAR.to_string(),
                is_admin: new.is_admin,
                is_active: true,
                is_deleted: false,
                created_at: now,
                modified_at: now,
            };
            users.push(user.clone());
            Ok(user)
        }

        async fn save(&self, user: &User) -> Result<User> {
            self.check_available()?;
            let mut users = self.lock();
            if users
                .iter()
                .any(|u| u.id != user.id && u.email == user.email)
            {
                return Err(violation("email"));
            }

            let slot = users
                .iter_mut()
                .find(|u| u.id == user.id)
                .ok_or_else(|| VjError::NotFound(format!("user {}", user.id)))?;
            *slot = User {
                modified_at: Utc::now(),
                ..user.clone()
            };
            Ok(slot.clone())
        }

        async fn health_check(&self) -> Result<()> {
            self.check_available()
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryUserStore;
