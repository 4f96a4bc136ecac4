//! Application state management

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{
    AuthGate, AuthService, CredentialHasher, JwtError, TokenCodec, TokenRevocationLedger, UidPool,
};
use crate::cache::Cache;
use vj_core::{AppConfig, UserStore};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Revocation ledger and identifier pool backend
    pub cache: Arc<dyn Cache>,
    /// Credential store
    pub store: Arc<dyn UserStore>,
    /// Account operations
    pub auth: AuthService,
    /// Bearer token checks for protected routes
    pub gate: AuthGate,
}

impl AppState {
    /// Wire the services from config and the two backends.
    ///
    /// Fails only when the auth section names an unsupported algorithm.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        cache: Arc<dyn Cache>,
        hasher: CredentialHasher,
    ) -> Result<Self, JwtError> {
        let codec = TokenCodec::from_config(&config.auth)?;
        let ledger = TokenRevocationLedger::from_config(cache.clone(), &config.auth);
        let uid_pool = UidPool::new(cache.clone(), store.clone(), config.uid_pool.clone());

        let gate = AuthGate::new(codec.clone(), ledger.clone(), store.clone());
        let auth = AuthService::new(store.clone(), codec, hasher, ledger, uid_pool);

        Ok(Self {
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            cache,
            store,
            auth,
            gate,
        })
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
