//! # zcache
//!
//! **Sharded client for memcache-style key/value caches**
//!
//! zcache spreads keys over a set of cache nodes with consistent hashing and
//! fans batch operations out to every owning node at once. A slow or broken
//! node degrades a batch call instead of failing it: the values served by
//! healthy nodes come back alongside a per-key error map.
//!
//! ## Components
//!
//! - **[`HashRing`]**: weighted consistent hashing, each node placed on the
//!   ring 40 times per unit of weight
//! - **[`CacheCluster`]**: routing, concurrent per-node dispatch with a
//!   request timeout, partial-failure aggregation and latency statistics
//! - **[`ConnectionPool`]**: fixed set of connections to one node, selected
//!   round-robin among those currently connected
//! - **[`ConnectionWrapper`]**: connection lifecycle state machine around a
//!   raw backend connection
//! - **[`FakeCache`]**: in-process backend with artificial latency and
//!   failure injection
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use zcache::{CacheCluster, CacheItem, ClusterConfig, FakeCache};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cluster = CacheCluster::new(ClusterConfig::default());
//! for name in ["cache-a:11211", "cache-b:11211", "cache-c:11211"] {
//!     cluster.add_node(name, Arc::new(FakeCache::new()), 1)?;
//! }
//! cluster.connect().await?;
//!
//! let items: Vec<CacheItem> = (0..10)
//!     .map(|i| CacheItem::new(format!("key{}", i), format!("value{}", i)))
//!     .collect();
//! cluster.mset(&items).await?;
//!
//! let keys: Vec<String> = items.iter().map(|item| item.key.clone()).collect();
//! let values = cluster.mget(&keys).await?;
//! assert_eq!(values[3].as_deref(), Some(&b"value3"[..]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Partial results
//!
//! ```rust
//! use std::sync::Arc;
//! use zcache::{CacheCluster, CacheError, ClusterConfig, FakeCache};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut cluster = CacheCluster::new(ClusterConfig::default());
//! # cluster.add_node("cache-a:11211", Arc::new(FakeCache::new()), 1)?;
//! # cluster.connect().await?;
//! let keys: Vec<String> = (0..100).map(|i| format!("key{}", i)).collect();
//! match cluster.mget(&keys).await {
//!     Ok(values) => println!("{} values", values.len()),
//!     Err(CacheError::PartialResult(partial)) => {
//!         println!("{} keys served, {} failed", partial.data().len(), partial.errors().len());
//!     }
//!     Err(err) => return Err(err.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod ring;

// Re-export commonly used types
pub use cache::fake::{FakeCache, RequestCounts};
pub use cache::{CacheInstance, CacheItem, CacheKey};
pub use cluster::CacheCluster;
pub use config::{ClusterConfig, ConnectionOptions, NodeOptions};
pub use connection::{
    ConnectionEvent, ConnectionFactory, ConnectionPool, ConnectionState, ConnectionWrapper,
};
pub use error::{CacheError, PartialResultError};
pub use metrics::{ClusterMetrics, MetricsSnapshot, Operation, OperationSnapshot, OperationStats};
pub use ring::HashRing;
