//! Shared key-value cache
//!
//! The token revocation ledger and the identifier pool both live in the
//! cache. Components depend on the `Cache` trait; production wires in
//! `RedisCache`.

mod redis;

#[cfg(any(test, feature = "test-utils"))]
mod memory;

pub use self::redis::RedisCache;

#[cfg(any(test, feature = "test-utils"))]
pub use self::memory::MemoryCache;

use async_trait::async_trait;
use thiserror::Error;

/// Cache errors
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Network-level failure: refused, reset, dropped
    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Cache operation timed out")]
    Timeout,

    /// The server answered with an error reply
    #[error("Cache command failed: {0}")]
    Command(String),

    /// The handle was closed during shutdown
    #[error("Cache client is closed")]
    Closed,
}

impl CacheError {
    /// Whether repeating the same command may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Connection(_) | CacheError::Timeout)
    }
}

impl From<::redis::RedisError> for CacheError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_timeout() {
            CacheError::Timeout
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            CacheError::Connection(e.to_string())
        } else {
            CacheError::Command(e.to_string())
        }
    }
}

/// Minimal command surface used by the auth components
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl_secs` seconds
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    /// Whether `key` is present and unexpired
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Add members to a set, returning how many were new
    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, CacheError>;

    /// Cardinality of a set; zero when absent
    async fn set_len(&self, key: &str) -> Result<usize, CacheError>;

    /// Remove and return one arbitrary member
    async fn set_pop(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    /// Release the connection. Later calls fail with `CacheError::Closed`.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::Timeout.is_transient());
        assert!(CacheError::Connection("reset".into()).is_transient());
        assert!(!CacheError::Command("WRONGTYPE".into()).is_transient());
        assert!(!CacheError::Closed.is_transient());
    }

    #[test]
    fn test_from_redis_error() {
        let io = ::redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(CacheError::from(io).is_transient());

        let reply = ::redis::RedisError::from((::redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(CacheError::from(reply), CacheError::Command(_)));
    }
}
