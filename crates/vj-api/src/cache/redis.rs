//! Redis-backed cache

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Cache, CacheError};
use vj_core::RedisConfig;

type PendingConnect = Shared<BoxFuture<'static, Result<ConnectionManager, CacheError>>>;

enum ConnState {
    Idle,
    /// One attempt in flight; every caller awaits the same future
    Connecting(PendingConnect),
    Ready(ConnectionManager),
}

/// Redis cache over a multiplexed, auto-reconnecting connection.
///
/// The connection is established on first use, so a server that is down at
/// startup does not prevent the process from booting. Concurrent callers
/// share a single connect attempt bounded by the command timeout.
pub struct RedisCache {
    client: Client,
    state: Mutex<ConnState>,
    closed: AtomicBool,
    timeout: Duration,
}

impl RedisCache {
    /// Build a client for `config.url`. Only an unparseable URL fails here.
    pub fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            state: Mutex::new(ConnState::Idle),
            closed: AtomicBool::new(false),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Build a client and establish the connection immediately
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let cache = Self::new(config)?;
        cache.connection().await?;
        Ok(cache)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }

        // The guard is released before any await
        let pending = {
            let mut state = self.lock_state();
            match &*state {
                // ConnectionManager is a cheap handle onto one multiplexed connection
                ConnState::Ready(conn) => return Ok(conn.clone()),
                ConnState::Connecting(pending) => pending.clone(),
                ConnState::Idle => {
                    let pending = self.start_connect();
                    *state = ConnState::Connecting(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.lock_state();
        let current = matches!(&*state, ConnState::Connecting(p) if p.ptr_eq(&pending));
        match &result {
            Ok(conn) if current && !self.closed.load(Ordering::SeqCst) => {
                info!("Connected to Redis");
                *state = ConnState::Ready(conn.clone());
            }
            Err(e) if current => {
                warn!(error = %e, "Redis connect attempt failed");
                *state = ConnState::Idle;
            }
            _ => {}
        }
        drop(state);

        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        result
    }

    fn start_connect(&self) -> PendingConnect {
        let client = self.client.clone();
        let timeout = self.timeout;
        async move {
            match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
                Ok(result) => result.map_err(CacheError::from),
                Err(_) => Err(CacheError::Timeout),
            }
        }
        .boxed()
        .shared()
    }

    async fn query<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, CacheError> {
        let mut conn = self.connection().await?;

        match tokio::time::timeout(self.timeout, cmd.query_async::<_, T>(&mut conn)).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl_secs);
        self.query::<()>(cmd).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        self.query::<bool>(cmd).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, CacheError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("SADD");
        cmd.arg(key).arg(members);
        self.query::<usize>(cmd).await
    }

    async fn set_len(&self, key: &str) -> Result<usize, CacheError> {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(key);
        self.query::<usize>(cmd).await
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut cmd = redis::cmd("SPOP");
        cmd.arg(key);
        self.query::<Option<String>>(cmd).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.query::<()>(redis::cmd("PING")).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.lock_state(), ConnState::Idle);
        if matches!(previous, ConnState::Ready(_)) {
            debug!("Redis connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let config = RedisConfig {
            url: "not-a-redis-url".to_string(),
            timeout_ms: 100,
        };
        assert!(RedisCache::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_closed_client_rejects_commands() {
        let cache = RedisCache::new(&RedisConfig::default()).unwrap();
        cache.close().await;
        assert!(matches!(cache.exists("any").await, Err(CacheError::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_commands_share_one_connect_attempt() {
        // Unroutable address: the connect either hangs until the timeout or fails fast
        let config = RedisConfig {
            url: "redis://10.255.255.1:6379".to_string(),
            timeout_ms: 300,
        };
        let cache = std::sync::Arc::new(RedisCache::new(&config).unwrap());

        let started = std::time::Instant::now();
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.exists("k").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }

        assert!(
            started.elapsed() < Duration::from_millis(900),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried_on_next_call() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            timeout_ms: 300,
        };
        let cache = RedisCache::new(&config).unwrap();
        assert!(cache.ping().await.is_err());
        assert!(matches!(*cache.lock_state(), ConnState::Idle));
        assert!(cache.ping().await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_round_trip_against_server() {
        let cache = RedisCache::connect(&RedisConfig::default()).await.unwrap();
        cache.set_ex("vj_test_key", "1", 5).await.unwrap();
        assert!(cache.exists("vj_test_key").await.unwrap());

        cache
            .set_add("vj_test_set", &["1".to_string(), "2".to_string()])
            .await
            .unwrap();
        assert!(cache.set_pop("vj_test_set").await.unwrap().is_some());
    }
}
