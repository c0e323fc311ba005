use crate::cache::{CacheInstance, CacheItem, CacheKey};
use crate::config::ConnectionOptions;
use crate::connection::wrapper::{ConnectionState, ConnectionWrapper};
use crate::error::CacheError;
use bytes::Bytes;
use futures::future::{join_all, try_join_all};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Creates raw backend connections for a pool.
///
/// Implemented by the embedder for each backend protocol. `create` should
/// only build the connection object; I/O belongs in the returned instance's
/// `connect`.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn create(
        &self,
        uri: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn CacheInstance>, CacheError>;
}

/// Fixed-size set of connections to one backend node.
///
/// Every connection is created up front and wrapped in its own
/// [`ConnectionWrapper`]. Requests go to the next connected wrapper in
/// round-robin order; when none is connected they fail immediately, there
/// is no wait queue.
pub struct ConnectionPool {
    uri: String,
    capacity: usize,
    min_connections: usize,
    options: ConnectionOptions,
    wrappers: Vec<Arc<ConnectionWrapper>>,
    next_index: AtomicUsize,
}

impl ConnectionPool {
    /// Create `capacity` connections through `factory`.
    ///
    /// `min_connections` is recorded only. A factory error aborts the whole
    /// pool.
    pub async fn new(
        uri: impl Into<String>,
        capacity: usize,
        options: ConnectionOptions,
        min_connections: usize,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self, CacheError> {
        let uri = uri.into();
        if capacity == 0 {
            return Err(CacheError::Configuration(format!(
                "pool for {} needs a capacity of at least 1",
                uri
            )));
        }

        let connections =
            try_join_all((0..capacity).map(|_| factory.create(&uri, &options))).await?;

        let wrappers = connections
            .into_iter()
            .map(|raw| {
                Arc::new(ConnectionWrapper::with_connect_timeout(
                    uri.clone(),
                    raw,
                    options.connect_timeout(),
                ))
            })
            .collect();

        tracing::debug!("Created pool for {} with {} connections", uri, capacity);

        Ok(Self {
            uri,
            capacity,
            min_connections,
            options,
            wrappers,
            next_index: AtomicUsize::new(0),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn wrappers(&self) -> &[Arc<ConnectionWrapper>] {
        &self.wrappers
    }

    pub fn connected_count(&self) -> usize {
        self.wrappers
            .iter()
            .filter(|wrapper| wrapper.state() == ConnectionState::Connected)
            .count()
    }

    /// Next connected wrapper in round-robin order.
    ///
    /// Selection is advisory: concurrent callers may be handed the same
    /// wrapper.
    pub fn acquire(&self) -> Result<Arc<ConnectionWrapper>, CacheError> {
        let len = self.wrappers.len();
        let start = self.next_index.load(Ordering::Relaxed);

        for offset in 0..len {
            let index = (start + offset) % len;
            let wrapper = &self.wrappers[index];
            if wrapper.state() == ConnectionState::Connected {
                self.next_index.store((index + 1) % len, Ordering::Relaxed);
                return Ok(Arc::clone(wrapper));
            }
        }

        Err(CacheError::Connectivity(format!(
            "no connected connection to {}",
            self.uri
        )))
    }
}

#[async_trait::async_trait]
impl CacheInstance for ConnectionPool {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.acquire()?.get(key).await
    }

    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Bytes>>, CacheError> {
        self.acquire()?.mget(keys).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.acquire()?.set(key, value, ttl).await
    }

    async fn mset(&self, items: &[CacheItem], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.acquire()?.mset(items, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.acquire()?.del(key).await
    }

    fn is_available(&self) -> bool {
        self.wrappers.iter().any(|wrapper| wrapper.is_available())
    }

    /// Connect every wrapper concurrently; succeeds when at least one does.
    async fn connect(&self) -> Result<(), CacheError> {
        let results = join_all(self.wrappers.iter().map(|wrapper| wrapper.connect())).await;

        let mut connected = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => connected += 1,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if connected == 0 {
            return Err(first_error.unwrap_or_else(|| {
                CacheError::Connectivity(format!("no connection to {} could be opened", self.uri))
            }));
        }

        if connected < self.capacity {
            tracing::warn!(
                "Pool for {} connected {}/{} connections",
                self.uri,
                connected,
                self.capacity
            );
        }
        Ok(())
    }

    async fn disconnect(&self) {
        join_all(self.wrappers.iter().map(|wrapper| wrapper.disconnect())).await;
    }

    async fn destroy(&self) {
        join_all(self.wrappers.iter().map(|wrapper| wrapper.destroy())).await;
    }
}
