//! Identifier pool allocator
//!
//! Public user identifiers are fixed-length numeric strings. Checking a
//! random candidate against the credential store on every registration is
//! the slow part, so candidates are validated in batches and parked in a
//! cache set. A claim is a single SPOP.
//!
//! Two concurrent refills may validate and insert the same candidate, and
//! a pooled identifier may be taken by a direct insert after validation.
//! Both are rare; the store's unique constraint is the final guard and the
//! registration path re-claims on a uid violation.
//!
//! When the pool cannot serve a claim after `max_retries` rounds, candidates
//! are generated and checked one by one. With 10^10 possible identifiers a
//! collision is vanishingly unlikely, so that loop has no attempt ceiling;
//! only repeated store failures end it.

use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheError};
use vj_core::{is_valid_uid, UidPoolConfig, UserStore, VjError};

#[derive(Debug, Error)]
pub enum UidPoolError {
    #[error("credential store error while generating uid: {0}")]
    Store(#[from] VjError),

    #[error("cache error while refilling uid pool: {0}")]
    Cache(#[from] CacheError),
}

/// Generate a random numeric identifier of `len` digits
pub fn random_uid(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Cache-backed pool of pre-validated user identifiers
#[derive(Clone)]
pub struct UidPool {
    cache: Arc<dyn Cache>,
    store: Arc<dyn UserStore>,
    config: UidPoolConfig,
    background_refill: Arc<AtomicBool>,
}

impl UidPool {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn UserStore>, config: UidPoolConfig) -> Self {
        Self {
            cache,
            store,
            config,
            background_refill: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &UidPoolConfig {
        &self.config
    }

    /// Hand out an identifier no existing user holds.
    ///
    /// Pops from the pool, refilling synchronously when it is empty, and
    /// falls back to direct generation after `max_retries` rounds. Errors
    /// only when the credential store keeps failing during that fallback.
    pub async fn claim(&self) -> Result<String, UidPoolError> {
        self.refill_in_background_if_low().await;

        let rounds = self.config.max_retries.max(1);
        for round in 1..=rounds {
            match self.cache.set_pop(&self.config.key).await {
                Ok(Some(uid)) if is_valid_uid(&uid, self.config.uid_length) => {
                    debug!(uid = %uid, "Claimed uid from pool");
                    return Ok(uid);
                }
                Ok(Some(junk)) => {
                    warn!(round, member = %junk, "Discarding malformed uid pool member");
                }
                Ok(None) => {
                    debug!(round, "Uid pool empty");
                }
                Err(e) => {
                    warn!(round, error = %e, "Uid pool pop failed");
                }
            }

            if round < rounds {
                if let Err(e) = self.refill().await {
                    warn!(round, error = %e, "Uid pool refill failed");
                }
            }
        }

        warn!(
            rounds,
            "Uid pool could not serve a claim, generating uid directly"
        );
        self.generate_direct().await
    }

    /// Top the pool up to `capacity` with validated candidates.
    ///
    /// Safe to run concurrently. Returns how many members were added.
    pub async fn refill(&self) -> Result<usize, UidPoolError> {
        let mut added = 0;
        loop {
            let size = self.cache.set_len(&self.config.key).await?;
            if size >= self.config.capacity {
                break;
            }

            let batch = self.validated_batch(self.config.capacity - size).await?;
            let new = self.cache.set_add(&self.config.key, &batch).await?;
            added += new;
            if new == 0 {
                // Everything we validated was already pooled by a concurrent refill
                break;
            }
        }

        if added > 0 {
            info!(added, key = %self.config.key, "Uid pool refilled");
        }
        Ok(added)
    }

    /// Generate candidates until one is free in the credential store
    pub async fn generate_direct(&self) -> Result<String, UidPoolError> {
        let mut store_errors = 0u32;
        loop {
            let candidate = random_uid(self.config.uid_length);
            match self.store.get_by_uid(&candidate).await {
                Ok(None) => return Ok(candidate),
                Ok(Some(_)) => {
                    debug!("Generated uid already taken, trying another");
                    store_errors = 0;
                }
                Err(e) => {
                    store_errors += 1;
                    if store_errors >= self.config.max_store_errors.max(1) {
                        return Err(e.into());
                    }
                    warn!(
                        attempt = store_errors,
                        error = %e,
                        "Credential store lookup failed during uid generation"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(store_errors))).await;
                }
            }
        }
    }

    async fn validated_batch(&self, needed: usize) -> Result<Vec<String>, UidPoolError> {
        let mut seen = HashSet::with_capacity(needed);
        let mut batch = Vec::with_capacity(needed);
        while batch.len() < needed {
            let candidate = random_uid(self.config.uid_length);
            if !seen.insert(candidate.clone()) {
                continue;
            }
            if self.store.get_by_uid(&candidate).await?.is_none() {
                batch.push(candidate);
            }
        }
        Ok(batch)
    }

    /// Spawn a refill when the pool has dropped below the threshold but is
    /// not empty. An empty pool is refilled by the claim itself.
    async fn refill_in_background_if_low(&self) {
        let size = match self.cache.set_len(&self.config.key).await {
            Ok(size) => size,
            Err(e) => {
                debug!(error = %e, "Uid pool size check failed");
                return;
            }
        };
        if size == 0 || size >= self.config.threshold {
            return;
        }
        if self.background_refill.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pool.refill().await {
                warn!(error = %e, "Background uid pool refill failed");
            }
            pool.background_refill.store(false, Ordering::SeqCst);
        });
    }
}
