//! Token revocation ledger
//!
//! Logout writes `blacklist_token:<token>` into the cache with a TTL equal
//! to the token's remaining validity, so an entry lives exactly as long as
//! the token it blocks. Writes are retried and fail loudly; reads fail open.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::cache::{Cache, CacheError};
use crate::retry::{with_retry, RetryConfig, RetryError};
use vj_core::AuthConfig;

/// Key prefix shared with existing deployments
pub const BLACKLIST_PREFIX: &str = "blacklist_token:";

/// Marker stored as the entry value
const REVOKED_MARKER: &str = "1";

pub fn blacklist_key(token: &str) -> String {
    format!("{BLACKLIST_PREFIX}{token}")
}

/// Revocation write failures
#[derive(Debug, Error)]
pub enum RevocationError {
    /// The cache stayed unreachable for every attempt
    #[error("revocation store unavailable after {attempts} attempts")]
    ServiceUnavailable {
        attempts: u32,
        #[source]
        source: CacheError,
    },

    /// The cache rejected the write outright
    #[error("revocation write failed: {0}")]
    Cache(#[source] CacheError),
}

/// Cache-backed blacklist of revoked access tokens
#[derive(Clone)]
pub struct TokenRevocationLedger {
    cache: Arc<dyn Cache>,
    retry: RetryConfig,
}

impl TokenRevocationLedger {
    pub fn new(cache: Arc<dyn Cache>, retry: RetryConfig) -> Self {
        Self { cache, retry }
    }

    /// Retry policy from the `auth` section: doubling backoff, no jitter
    pub fn from_config(cache: Arc<dyn Cache>, config: &AuthConfig) -> Self {
        let retry = RetryConfig {
            max_attempts: config.revoke_max_attempts,
            initial_backoff: Duration::from_millis(config.revoke_initial_backoff_ms),
            ..Default::default()
        };
        Self::new(cache, retry)
    }

    /// Record `token` as revoked for `remaining` more time.
    ///
    /// The TTL is rounded up to whole seconds so the entry never expires
    /// before the token. A zero `remaining` writes nothing: the token is
    /// already unusable.
    pub async fn revoke(&self, token: &str, remaining: Duration) -> Result<(), RevocationError> {
        let ttl_secs = ttl_secs_ceil(remaining);
        if ttl_secs == 0 {
            debug!("Token already expired, no revocation entry written");
            return Ok(());
        }

        let key = blacklist_key(token);
        let result = with_retry(&self.retry, CacheError::is_transient, || {
            self.cache.set_ex(&key, REVOKED_MARKER, ttl_secs)
        })
        .await;

        match result {
            Ok(()) => {
                debug!(ttl_secs, "Revocation entry written");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(attempts, error = %last, "Failed to write revocation entry");
                Err(RevocationError::ServiceUnavailable {
                    attempts,
                    source: last,
                })
            }
            Err(RetryError::Permanent(e)) => {
                error!(error = %e, "Revocation write rejected by cache");
                Err(RevocationError::Cache(e))
            }
        }
    }

    /// Whether `token` has been revoked.
    ///
    /// Fails open: if the cache cannot be asked, the token is treated as
    /// not revoked and the failure is logged.
    pub async fn is_revoked(&self, token: &str) -> bool {
        match self.cache.exists(&blacklist_key(token)).await {
            Ok(revoked) => revoked,
            Err(e) => {
                error!(error = %e, "Revocation check failed, treating token as not revoked");
                false
            }
        }
    }
}

fn ttl_secs_ceil(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn ledger(cache: Arc<MemoryCache>) -> TokenRevocationLedger {
        TokenRevocationLedger::new(
            cache,
            RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(5),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_key_format() {
        assert_eq!(blacklist_key("abc.def.ghi"), "blacklist_token:abc.def.ghi");
    }

    #[test]
    fn test_ttl_rounds_up() {
        assert_eq!(ttl_secs_ceil(Duration::from_secs(1800)), 1800);
        assert_eq!(ttl_secs_ceil(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs_ceil(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs_ceil(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_revoke_then_is_revoked() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        assert!(!ledger.is_revoked("tok").await);
        ledger.revoke("tok", Duration::from_secs(1800)).await.unwrap();
        assert!(ledger.is_revoked("tok").await);
        assert!(!ledger.is_revoked("other").await);

        let ttl = cache.ttl("blacklist_token:tok").unwrap();
        assert!(ttl > Duration::from_secs(1798) && ttl <= Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_revoke_twice_is_idempotent() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        ledger.revoke("tok", Duration::from_secs(60)).await.unwrap();
        ledger.revoke("tok", Duration::from_secs(60)).await.unwrap();
        assert!(ledger.is_revoked("tok").await);
        assert_eq!(cache.set_ex_calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_remaining_writes_nothing() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        ledger.revoke("tok", Duration::ZERO).await.unwrap();
        assert_eq!(cache.set_ex_calls(), 0);
        assert!(!ledger.is_revoked("tok").await);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        cache.fail_next_writes(2);
        ledger.revoke("tok", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.set_ex_calls(), 3);
        assert!(ledger.is_revoked("tok").await);
    }

    #[tokio::test]
    async fn test_outage_reports_unavailable_and_reads_fail_open() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        ledger.revoke("tok", Duration::from_secs(60)).await.unwrap();
        cache.set_available(false);

        let err = ledger
            .revoke("tok2", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RevocationError::ServiceUnavailable { attempts: 3, .. }
        ));
        assert_eq!(cache.set_ex_calls(), 4);

        // Even the entry written before the outage cannot be seen
        assert!(!ledger.is_revoked("tok").await);
    }

    #[tokio::test]
    async fn test_closed_cache_is_not_retried() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger(cache.clone());

        cache.close().await;
        let err = ledger
            .revoke("tok", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RevocationError::Cache(CacheError::Closed)));
        assert_eq!(cache.set_ex_calls(), 1);
    }
}
