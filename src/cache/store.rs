//! Key-value backends for the stats cache.
//!
//! The cache only needs point reads and writes with a TTL, point deletes,
//! and deletion by key prefix. [`MemoryStore`] provides these in process;
//! a networked backend can be plugged in by implementing [`CacheStore`].

use std::time::Duration;

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;
use tokio::time::Instant;

/// Default upper bound on entries held by a [`MemoryStore`].
pub const DEFAULT_CAPACITY: u64 = 10_000;

/// Key-value store with per-entry expiry.
///
/// Individual reads and writes are atomic; nothing else is coordinated.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The live value under `key`, if any.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Remove `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Remove every key starting with `prefix`. Returns how many live
    /// entries were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> usize;

    /// Whether a live entry exists under `key`.
    async fn exists(&self, key: &str) -> bool;
}

#[derive(Debug, Clone)]
struct StoredValue {
    payload: String,
    ttl: Duration,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Evicts each entry once its own TTL has elapsed.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`CacheStore`] backed by a bounded moka cache.
///
/// moka evicts expired entries in the background and keeps the store under
/// its capacity. Each entry also records its deadline on the tokio clock,
/// which is what reads check, so a paused test clock controls expiry.
pub struct MemoryStore {
    entries: Cache<String, StoredValue>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding at most `capacity` entries.
    pub fn with_capacity(capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { entries }
    }

    /// Time left before `key` expires, if it is live.
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Keys of all live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| String::clone(&key))
            .collect();
        keys.sort();
        keys
    }

    /// Entries physically held, live or not, after pending evictions run.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;

        if entry.is_expired(now) {
            self.entries.invalidate(key);
            return None;
        }
        Some(entry.payload)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> usize {
        let now = Instant::now();
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| String::clone(&key))
            .collect();

        matching
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}
