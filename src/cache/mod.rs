use crate::error::CacheError;
use bytes::Bytes;
use std::time::Duration;

pub type CacheKey = String;

/// One key/value pair of an `mset` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: CacheKey,
    pub value: Bytes,
}

impl CacheItem {
    pub fn new(key: impl Into<CacheKey>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Capability contract implemented by every cache backend.
///
/// Data operations are asynchronous and may fail independently per call.
/// `connect`, `disconnect` and `destroy` drive the backend's lifecycle;
/// once `destroy` has run, every later call must fail.
#[async_trait::async_trait]
pub trait CacheInstance: Send + Sync + 'static {
    /// Get a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Get many values; the result has the same length and order as `keys`
    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Bytes>>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn mset(&self, items: &[CacheItem], ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    fn is_available(&self) -> bool;

    async fn connect(&self) -> Result<(), CacheError>;

    /// Gracefully tear down the active connection; `connect` may follow
    async fn disconnect(&self);

    /// Terminal teardown
    async fn destroy(&self);
}

pub mod fake;
