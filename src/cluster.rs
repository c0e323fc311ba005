//! Sharded cache client.
//!
//! [`CacheCluster`] routes every key to exactly one node through a
//! [`HashRing`] and splits batch operations into one sub-request per node.
//! Sub-requests run concurrently and are always joined in full, so a failing
//! node never discards the answers of healthy ones: batch calls that lose a
//! node return [`CacheError::PartialResult`] carrying both the successful
//! values and the per-key errors.

use crate::cache::{CacheInstance, CacheItem, CacheKey};
use crate::config::{ClusterConfig, ConnectionOptions, NodeOptions};
use crate::connection::pool::{ConnectionFactory, ConnectionPool};
use crate::error::{CacheError, PartialResultError};
use crate::metrics::{ClusterMetrics, MetricsSnapshot, Operation, OperationStats};
use crate::ring::HashRing;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Registry entry for one backend node.
struct Node {
    name: String,
    instance: Arc<dyn CacheInstance>,
    options: NodeOptions,
}

/// Keys (by input position) that share an owning node.
struct NodeBatch {
    node: usize,
    positions: Vec<usize>,
}

pub struct CacheCluster {
    config: ClusterConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
    nodes: Vec<Node>,
    ring: HashRing,
    metrics: Arc<ClusterMetrics>,
    connected: AtomicBool,
    destroyed: AtomicBool,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl CacheCluster {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            factory: None,
            nodes: Vec::new(),
            ring: HashRing::default(),
            metrics: Arc::new(ClusterMetrics::new()),
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            reporter: Mutex::new(None),
        }
    }

    /// Cluster whose pool-backed nodes are created through `factory`.
    pub fn with_factory(config: ClusterConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let mut cluster = Self::new(config);
        cluster.factory = Some(factory);
        cluster
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Register a node backed by a single instance.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        instance: Arc<dyn CacheInstance>,
        weight: u32,
    ) -> Result<(), CacheError> {
        self.add_node_with_options(name, instance, NodeOptions::with_weight(weight))
    }

    pub fn add_node_with_options(
        &mut self,
        name: impl Into<String>,
        instance: Arc<dyn CacheInstance>,
        options: NodeOptions,
    ) -> Result<(), CacheError> {
        let name = name.into();
        self.check_registration(&name, &options)?;

        tracing::debug!("Registering cache node {} (weight {})", name, options.weight);
        self.nodes.push(Node {
            name,
            instance,
            options,
        });
        self.rebuild_ring();
        Ok(())
    }

    /// Register a node reached through a pool of `capacity` connections to `uri`.
    ///
    /// The connections are created immediately through the cluster's
    /// factory. `min_connections` is recorded only.
    pub async fn set_capacity(
        &mut self,
        uri: impl Into<String>,
        capacity: usize,
        options: ConnectionOptions,
        min_connections: usize,
    ) -> Result<(), CacheError> {
        let uri = uri.into();
        let node_options = NodeOptions {
            weight: 1,
            min_connections,
        };
        self.check_registration(&uri, &node_options)?;

        let factory = self.factory.clone().ok_or_else(|| {
            CacheError::Configuration("set_capacity requires a connection factory".to_string())
        })?;
        let pool =
            ConnectionPool::new(uri.clone(), capacity, options, min_connections, factory.as_ref())
                .await?;

        self.add_node_with_options(uri, Arc::new(pool), node_options)
    }

    fn check_registration(&self, name: &str, options: &NodeOptions) -> Result<(), CacheError> {
        if self.connected.load(Ordering::SeqCst) || self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::Configuration(format!(
                "cannot register {} after the cluster was connected",
                name
            )));
        }
        if options.weight == 0 {
            return Err(CacheError::Configuration(format!(
                "node {} needs a weight of at least 1",
                name
            )));
        }
        if self.nodes.iter().any(|node| node.name == name) {
            return Err(CacheError::Configuration(format!(
                "node {} is already registered",
                name
            )));
        }
        Ok(())
    }

    fn rebuild_ring(&mut self) {
        self.ring = HashRing::build(
            self.nodes
                .iter()
                .map(|node| (node.name.as_str(), node.options.weight)),
        );
    }

    /// Names of the registered nodes, in registration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name.as_str()).collect()
    }

    pub fn node(&self, name: &str) -> Option<Arc<dyn CacheInstance>> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| Arc::clone(&node.instance))
    }

    pub fn node_options(&self, name: &str) -> Option<NodeOptions> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| node.options)
    }

    /// Connect every node concurrently.
    ///
    /// Succeeds as soon as at least one node connected; failed nodes only
    /// show up later as per-node request failures.
    pub async fn connect(&self) -> Result<(), CacheError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::ClusterDestroyed);
        }
        if self.nodes.is_empty() {
            return Err(CacheError::Configuration(
                "no cache nodes registered".to_string(),
            ));
        }

        let results = join_all(self.nodes.iter().map(|node| node.instance.connect())).await;

        let mut connected = 0;
        let mut first_error = None;
        for (node, result) in self.nodes.iter().zip(results) {
            match result {
                Ok(()) => connected += 1,
                Err(err) => {
                    tracing::warn!("Failed to connect cache node {}: {}", node.name, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        if connected == 0 {
            return Err(first_error.unwrap_or_else(|| {
                CacheError::Connectivity("no cache node could be connected".to_string())
            }));
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            "Cache cluster connected: {}/{} nodes available",
            connected,
            self.nodes.len()
        );
        self.start_reporter();
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst)
    }

    /// Tear down every node. Later operations fail with `ClusterDestroyed`.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let reporter = self.reporter.lock().take();
        if let Some(handle) = reporter {
            handle.abort();
        }

        join_all(self.nodes.iter().map(|node| node.instance.destroy())).await;
        tracing::info!("Cache cluster destroyed");
    }

    fn start_reporter(&self) {
        let Some(interval) = self.config.stats_report_interval() else {
            return;
        };

        let mut reporter = self.reporter.lock();
        if reporter.is_some() {
            return;
        }

        let metrics = Arc::clone(&self.metrics);
        *reporter = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_snapshot(&metrics.snapshot());
            }
        }));
    }

    /// Node owning `key`. Pure lookup, no I/O.
    pub fn get_uris_by_key(&self, key: &str) -> Option<&str> {
        self.ring.route(key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let node = self.route(key)?;
        let key = key.to_string();
        let started = Instant::now();

        let value = self
            .dispatch(Operation::Get, node, move |instance| async move {
                instance.get(&key).await
            })
            .await?;

        self.metrics.record_latency(Operation::Get, started.elapsed());
        self.metrics.record_access(1, value.is_some() as u64);
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), CacheError> {
        self.set_inner(key, value.into(), None).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_inner(key, value.into(), Some(ttl)).await
    }

    async fn set_inner(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let node = self.route(key)?;
        let key = key.to_string();
        let started = Instant::now();

        self.dispatch(Operation::Set, node, move |instance| async move {
            instance.set(&key, value, ttl).await
        })
        .await?;

        self.metrics.record_latency(Operation::Set, started.elapsed());
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let node = self.route(key)?;
        let key = key.to_string();
        let started = Instant::now();

        self.dispatch(Operation::Del, node, move |instance| async move {
            instance.del(&key).await
        })
        .await?;

        self.metrics.record_latency(Operation::Del, started.elapsed());
        Ok(())
    }

    /// Fetch many keys; values come back in the order of `keys`.
    ///
    /// Duplicate keys are kept and answered positionally.
    pub async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Bytes>>, CacheError> {
        self.ensure_serving()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let batches = self.partition(keys.iter().map(String::as_str))?;
        let requests = batches.iter().map(|batch| {
            let batch_keys: Vec<CacheKey> =
                batch.positions.iter().map(|&pos| keys[pos].clone()).collect();
            self.dispatch(Operation::Mget, batch.node, move |instance| async move {
                instance.mget(&batch_keys).await
            })
        });
        let outcomes = join_all(requests).await;

        let mut values: Vec<Option<Bytes>> = vec![None; keys.len()];
        let mut data = HashMap::new();
        let mut errors = HashMap::new();
        let mut accesses = 0;
        let mut hits = 0;

        for (batch, outcome) in batches.iter().zip(outcomes) {
            let outcome = outcome.and_then(|found| {
                if found.len() == batch.positions.len() {
                    Ok(found)
                } else {
                    Err(CacheError::Backend(format!(
                        "node {} answered {} values for {} keys",
                        self.nodes[batch.node].name,
                        found.len(),
                        batch.positions.len()
                    )))
                }
            });

            match outcome {
                Ok(found) => {
                    for (&pos, value) in batch.positions.iter().zip(found) {
                        accesses += 1;
                        if value.is_some() {
                            hits += 1;
                        }
                        data.insert(keys[pos].clone(), value.clone());
                        values[pos] = value;
                    }
                }
                Err(err) => {
                    for &pos in &batch.positions {
                        errors.insert(keys[pos].clone(), err.clone());
                    }
                }
            }
        }

        self.metrics.record_access(accesses, hits);
        self.finish_batch(Operation::Mget, data, errors)?;
        self.metrics.record_latency(Operation::Mget, started.elapsed());
        Ok(values)
    }

    pub async fn mset(&self, items: &[CacheItem]) -> Result<(), CacheError> {
        self.mset_inner(items, None).await
    }

    pub async fn mset_with_ttl(&self, items: &[CacheItem], ttl: Duration) -> Result<(), CacheError> {
        self.mset_inner(items, Some(ttl)).await
    }

    async fn mset_inner(&self, items: &[CacheItem], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_serving()?;
        if items.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let batches = self.partition(items.iter().map(|item| item.key.as_str()))?;
        let requests = batches.iter().map(|batch| {
            let batch_items: Vec<CacheItem> =
                batch.positions.iter().map(|&pos| items[pos].clone()).collect();
            self.dispatch(Operation::Mset, batch.node, move |instance| async move {
                instance.mset(&batch_items, ttl).await
            })
        });
        let outcomes = join_all(requests).await;

        let mut data = HashMap::new();
        let mut errors = HashMap::new();

        for (batch, outcome) in batches.iter().zip(outcomes) {
            for &pos in &batch.positions {
                let item = &items[pos];
                match &outcome {
                    Ok(()) => {
                        data.insert(item.key.clone(), Some(item.value.clone()));
                    }
                    Err(err) => {
                        errors.insert(item.key.clone(), err.clone());
                    }
                }
            }
        }

        self.finish_batch(Operation::Mset, data, errors)?;
        self.metrics.record_latency(Operation::Mset, started.elapsed());
        Ok(())
    }

    fn finish_batch(
        &self,
        op: Operation,
        data: HashMap<String, Option<Bytes>>,
        errors: HashMap<String, CacheError>,
    ) -> Result<(), CacheError> {
        if errors.is_empty() {
            return Ok(());
        }

        self.metrics.record_partial_failure(op);
        tracing::warn!(
            "Partial {} failure: {} keys succeeded, {} keys failed",
            op,
            data.len(),
            errors.len()
        );
        Err(PartialResultError::new(data, errors).into())
    }

    fn ensure_serving(&self) -> Result<(), CacheError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::ClusterDestroyed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CacheError::Connectivity(
                "cluster is not connected".to_string(),
            ));
        }
        Ok(())
    }

    fn route(&self, key: &str) -> Result<usize, CacheError> {
        self.ensure_serving()?;
        self.ring
            .route_index(key)
            .ok_or_else(|| CacheError::Configuration("no cache nodes registered".to_string()))
    }

    /// Group key positions by owning node, nodes in order of first appearance.
    fn partition<'a>(
        &self,
        keys: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<NodeBatch>, CacheError> {
        let mut slots: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut batches: Vec<NodeBatch> = Vec::new();
        let mut total = 0;

        for (pos, key) in keys.enumerate() {
            total += 1;
            let node = self.route(key)?;
            let slot = *slots[node].get_or_insert_with(|| {
                batches.push(NodeBatch {
                    node,
                    positions: Vec::new(),
                });
                batches.len() - 1
            });
            batches[slot].positions.push(pos);
        }

        tracing::debug!("Split {} keys across {} nodes", total, batches.len());
        Ok(batches)
    }

    /// Run one sub-request against `node`, bounded by the request timeout.
    ///
    /// Latency is recorded by the caller, once per cluster call. The call
    /// runs on its own task. When the timeout fires the task is
    /// left to finish in the background and its result is dropped.
    async fn dispatch<T, F, Fut>(&self, op: Operation, node: usize, call: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn CacheInstance>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let node = &self.nodes[node];
        let task = tokio::spawn(call(Arc::clone(&node.instance)));

        let joined = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => Ok(Err(CacheError::Timeout(limit))),
            },
            None => task.await,
        };
        let result = joined.unwrap_or_else(|err| {
            Err(CacheError::Backend(format!("sub-request aborted: {}", err)))
        });

        if let Err(err) = &result {
            if err.is_timeout() {
                self.metrics.record_timeout(op);
            }
            tracing::warn!("{} on cache node {} failed: {}", op, node.name, err);
        }

        result
    }

    /// Latency statistics of fully successful calls of `op`.
    pub fn stats(&self, op: Operation) -> OperationStats {
        self.metrics.stats(op)
    }

    /// Keys looked up by `get`/`mget` on a reachable node
    pub fn access_count(&self) -> u64 {
        self.metrics.access_count()
    }

    pub fn hit_count(&self) -> u64 {
        self.metrics.hit_count()
    }

    pub fn hit_rate(&self) -> f64 {
        self.metrics.hit_rate()
    }

    pub fn partial_failure_count(&self, op: Operation) -> u64 {
        self.metrics.partial_failure_count(op)
    }

    pub fn timeout_count(&self, op: Operation) -> u64 {
        self.metrics.timeout_count(op)
    }

    pub fn reset_timeout_count(&self, op: Operation) {
        self.metrics.reset_timeout_count(op)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for CacheCluster {
    fn drop(&mut self) {
        if let Some(handle) = self.reporter.get_mut().take() {
            handle.abort();
        }
    }
}

fn log_snapshot(snapshot: &MetricsSnapshot) {
    for (op, stats) in &snapshot.operations {
        if stats.count == 0 && stats.partial_failures == 0 && stats.timeouts == 0 {
            continue;
        }
        tracing::info!(
            "Cache {}: count={} mean={:.2}ms max={:.2}ms partial_failures={} timeouts={}",
            op,
            stats.count,
            stats.mean_ms,
            stats.max_ms,
            stats.partial_failures,
            stats.timeouts
        );
    }
    tracing::info!(
        "Cache hit rate: {:.1}% ({}/{})",
        snapshot.hit_rate * 100.0,
        snapshot.hit_count,
        snapshot.access_count
    );
}
