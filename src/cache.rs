/// Cache Layer
///
/// A TTL key-value store behind a trait with Redis and in-process
/// implementations, explicit cache-key construction, and a read-through
/// helper.
///
/// Values are stored as JSON so any `Serialize` type can be cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// A key-value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `value`; `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Adds `amount` to the integer at `key` and returns the new value.
    ///
    /// A missing or expired key starts from zero and expires after `ttl`;
    /// an existing key keeps its original expiry.
    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError>;

    /// Remaining lifetime of `key`, if it exists and has an expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;
}

/// Builds a cache key from a namespace and the call's arguments.
///
/// Arguments are hashed so keys stay short and never carry raw user input.
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{}:{:x}", namespace, hasher.finalize())
}

/// Returns the cached value at `key`, or runs `load`, caches its result for
/// `ttl` and returns it.
///
/// Entries that no longer deserialize as `T` are treated as misses.
pub async fn get_or_load<T, E, F, Fut>(
    cache: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    load: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(value) = cache.get(key).await? {
        match serde_json::from_value::<T>(value) {
            Ok(hit) => {
                tracing::debug!(key = key, "Cache hit");
                return Ok(hit);
            }
            Err(e) => tracing::warn!(key = key, error = %e, "Discarding undecodable cache entry"),
        }
    }

    let loaded = load().await?;
    let value = serde_json::to_value(&loaded).map_err(CacheError::from)?;
    cache.set(key, value, Some(ttl)).await?;
    Ok(loaded)
}

/// Adds to a counter and gives it an expiry if it has none, in one round trip.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCRBY', KEYS[1], ARGV[1])
if redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return current
"#;

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

/// `CacheStore` backed by Redis. Values are stored as JSON strings, so the
/// cache is shared by every instance pointed at the same server.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    increment: redis::Script,
}

impl RedisCache {
    /// Connects to `url` (`redis://host:port/db`). The connection manager
    /// reconnects on its own after the server goes away.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis cache");

        Ok(Self {
            connection,
            increment: redis::Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(serde_json::to_string(&value)?);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError> {
        let mut conn = self.connection.clone();
        let current = self
            .increment
            .key(key)
            .arg(amount)
            .arg(millis(ttl))
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(current)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.connection.clone();
        // -2: no such key, -1: no expiry
        let remaining: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process `CacheStore`. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

/// Purges `cache` every `every` until the returned task is aborted.
///
/// Lazy expiry only drops keys that are read again; rate-limit counters for
/// clients that never come back would otherwise stay forever.
pub fn spawn_purge_task(cache: Arc<InMemoryCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match cache.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Dropped expired cache entries"),
                Err(e) => tracing::warn!(error = %e, "Cache purge failed"),
            }
        }
    })
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let live = match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        if let Some(entry) = entries.get_mut(key) {
            if entry.is_live(now) {
                let current = entry.value.as_i64().ok_or_else(|| {
                    CacheError::Unavailable(format!("value at {} is not an integer", key))
                })?;
                let next = current + amount;
                entry.value = Value::from(next);
                return Ok(next);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(amount),
                expires_at: Some(now + ttl),
            },
        );
        Ok(amount)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("llm:models", &["all"]);
        let b = cache_key("llm:models", &["all"]);
        assert_eq!(a, b);
        assert!(a.starts_with("llm:models:"));
    }

    #[test]
    fn test_cache_key_separates_argument_boundaries() {
        assert_ne!(cache_key("ns", &["ab", "c"]), cache_key("ns", &["a", "bc"]));
        assert_ne!(cache_key("ns", &["a"]), cache_key("other", &["a"]));
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", json!({"a": 1}), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set("k", json!("v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_keeps_first_expiry() {
        let cache = InMemoryCache::new();
        let window = Duration::from_secs(60);

        assert_eq!(cache.increment("n", 1, window).await.unwrap(), 1);
        assert_eq!(cache.increment("n", 1, window).await.unwrap(), 2);
        assert_eq!(cache.increment("n", 5, window).await.unwrap(), 7);

        let remaining = cache.ttl("n").await.unwrap().unwrap();
        assert!(remaining <= window);
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let cache = InMemoryCache::new();
        let window = Duration::from_millis(20);

        cache.increment("n", 3, window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.increment("n", 1, window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = InMemoryCache::new();
        cache
            .set("short", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("long", json!(2), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_task_drops_entries_nobody_reads() {
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set("idle", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();

        let task = spawn_purge_task(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        task.abort();

        assert_eq!(cache.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_get_or_load_calls_loader_once() {
        let cache = InMemoryCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Vec<String> = get_or_load(&cache, "models", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(vec!["gpt".to_string()])
            })
            .await
            .unwrap();
            assert_eq!(value, vec!["gpt".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_load_does_not_cache_failures() {
        let cache = InMemoryCache::new();

        let failed: Result<u32, CacheError> =
            get_or_load(&cache, "k", Duration::from_secs(60), || async {
                Err(CacheError::Unavailable("upstream down".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
