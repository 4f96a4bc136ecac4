//! In-process cache for tests
//!
//! Mirrors the Redis semantics the auth components rely on and can be told
//! to fail so that outage behavior is testable.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Cache, CacheError};

#[derive(Default)]
struct State {
    values: HashMap<String, (String, Instant)>,
    sets: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<State>,
    unavailable: AtomicBool,
    closed: AtomicBool,
    failing_writes: AtomicU32,
    set_ex_calls: AtomicUsize,
    set_pop_calls: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every command fails with a connection error
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `n` `set_ex` calls with a connection error
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_ex_calls(&self) -> usize {
        self.set_ex_calls.load(Ordering::SeqCst)
    }

    pub fn set_pop_calls(&self) -> usize {
        self.set_pop_calls.load(Ordering::SeqCst)
    }

    /// Remaining lifetime of a stored key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.lock();
        state
            .values
            .get(key)
            .and_then(|(_, deadline)| deadline.checked_duration_since(Instant::now()))
    }

    /// Snapshot of a set's members
    pub fn members(&self, key: &str) -> HashSet<String> {
        self.lock().sets.get(key).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.set_ex_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(CacheError::Connection("connection reset".to_string()));
        }

        if ttl_secs == 0 {
            return Err(CacheError::Command(
                "invalid expire time in 'set' command".to_string(),
            ));
        }

        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock()
            .values
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        let mut state = self.lock();
        let live = match state.values.get(key) {
            Some((_, deadline)) => *deadline > Instant::now(),
            None => return Ok(false),
        };
        if !live {
            state.values.remove(key);
        }
        Ok(live)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, CacheError> {
        self.check()?;
        let mut state = self.lock();
        let set = state.sets.entry(key.to_string()).or_default();
        Ok(members.iter().filter(|m| set.insert((*m).clone())).count())
    }

    async fn set_len(&self, key: &str) -> Result<usize, CacheError> {
        self.check()?;
        Ok(self.lock().sets.get(key).map_or(0, HashSet::len))
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.set_pop_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut state = self.lock();
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(None);
        };
        let member = set.iter().next().cloned();
        if let Some(m) = &member {
            set.remove(m);
        }
        Ok(member)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_ex_and_exists() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "1", 60).await.unwrap();
        assert!(cache.exists("k").await.unwrap());
        assert!(!cache.exists("other").await.unwrap());

        let ttl = cache.ttl("k").unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let cache = MemoryCache::new();
        let added = cache
            .set_add("pool", &["a".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(cache.set_len("pool").await.unwrap(), 2);

        let first = cache.set_pop("pool").await.unwrap().unwrap();
        let second = cache.set_pop("pool").await.unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.set_pop("pool").await.unwrap(), None);
        assert_eq!(cache.set_len("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let cache = MemoryCache::new();
        cache.fail_next_writes(2);
        assert!(cache.set_ex("k", "1", 10).await.is_err());
        assert!(cache.set_ex("k", "1", 10).await.is_err());
        assert!(cache.set_ex("k", "1", 10).await.is_ok());
        assert_eq!(cache.set_ex_calls(), 3);

        cache.set_available(false);
        assert!(matches!(
            cache.exists("k").await,
            Err(CacheError::Connection(_))
        ));

        cache.set_available(true);
        cache.close().await;
        assert!(matches!(cache.ping().await, Err(CacheError::Closed)));
    }
}
