use crate::cache::{CacheInstance, CacheItem, CacheKey};
use crate::error::CacheError;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Delay applied to reads and writes unless overridden.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(10);

/// In-process cache backend for tests and benchmarks.
///
/// Stores entries in an unbounded LRU map, honors per-entry TTLs, adds an
/// artificial latency to mimic a network hop, and can be told to fail the
/// next N calls.
pub struct FakeCache {
    inner: Arc<RwLock<LruCache<CacheKey, CacheEntry>>>,
    latency: Mutex<Duration>,
    failure_count: AtomicUsize,
    next_failure: Mutex<CacheError>,
    counts: Mutex<RequestCounts>,
    connected: AtomicBool,
    destroyed: AtomicBool,
}

struct CacheEntry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Per-call counters kept by a [`FakeCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub get: u64,
    pub mget: u64,
    pub set: u64,
    pub mset: u64,
    pub del: u64,
    /// Batch size of every `mget` call, in call order
    pub mget_item_counts: Vec<usize>,
    pub hit_count: u64,
    pub miss_count: u64,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LruCache::unbounded())),
            latency: Mutex::new(latency),
            failure_count: AtomicUsize::new(0),
            next_failure: Mutex::new(default_failure()),
            counts: Mutex::new(RequestCounts::default()),
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fail the next `count` data calls with the configured failure.
    pub fn set_failure_count(&self, count: usize) {
        self.failure_count.store(count, Ordering::SeqCst);
    }

    /// Error returned by injected failures; defaults to `Backend("fake failure")`.
    pub fn set_next_failure(&self, error: CacheError) {
        *self.next_failure.lock() = error;
    }

    pub fn request_counts(&self) -> RequestCounts {
        self.counts.lock().clone()
    }

    pub fn reset_request_counts(&self) {
        *self.counts.lock() = RequestCounts::default();
    }

    /// Drop all data and reset the request counters.
    pub async fn flush(&self) {
        self.inner.write().await.clear();
        self.reset_request_counts();
    }

    /// Snapshot of every live entry.
    pub async fn data(&self) -> HashMap<CacheKey, Bytes> {
        let cache = self.inner.read().await;
        cache
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, entry)| (key.clone(), entry.data.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.data().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_usable(&self) -> Result<(), CacheError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::Destroyed);
        }

        let injected = self
            .failure_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(self.next_failure.lock().clone());
        }

        Ok(())
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn lookup(&self, cache: &mut LruCache<CacheKey, CacheEntry>, key: &str) -> Option<Bytes> {
        let value = match cache.peek(key).map(CacheEntry::is_expired) {
            Some(true) => {
                cache.pop(key);
                None
            }
            Some(false) => cache.get(key).map(|entry| entry.data.clone()),
            None => None,
        };

        let mut counts = self.counts.lock();
        if value.is_some() {
            counts.hit_count += 1;
        } else {
            counts.miss_count += 1;
        }
        tracing::trace!(
            "FakeCache get {} [{}]",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );

        value
    }

    fn entry(value: Bytes, ttl: Option<Duration>) -> CacheEntry {
        CacheEntry {
            data: value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

impl Default for FakeCache {
    fn default() -> Self {
        Self::new()
    }
}

fn default_failure() -> CacheError {
    CacheError::Backend("fake failure".to_string())
}

#[async_trait::async_trait]
impl CacheInstance for FakeCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.check_usable()?;
        self.delay().await;

        let mut cache = self.inner.write().await;
        self.counts.lock().get += 1;
        Ok(self.lookup(&mut cache, key))
    }

    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Bytes>>, CacheError> {
        self.check_usable()?;
        self.delay().await;

        let mut cache = self.inner.write().await;
        {
            let mut counts = self.counts.lock();
            counts.mget += 1;
            counts.mget_item_counts.push(keys.len());
        }
        Ok(keys.iter().map(|key| self.lookup(&mut cache, key)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_usable()?;
        self.delay().await;

        let mut cache = self.inner.write().await;
        cache.put(key.to_string(), Self::entry(value, ttl));
        self.counts.lock().set += 1;
        tracing::trace!("FakeCache set {}", key);
        Ok(())
    }

    async fn mset(&self, items: &[CacheItem], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_usable()?;
        self.delay().await;

        let mut cache = self.inner.write().await;
        for item in items {
            cache.put(item.key.clone(), Self::entry(item.value.clone(), ttl));
        }
        self.counts.lock().mset += 1;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.check_usable()?;

        let mut cache = self.inner.write().await;
        cache.pop(key);
        self.counts.lock().del += 1;
        tracing::trace!("FakeCache del {}", key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), CacheError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::Destroyed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn destroy(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
