use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Settings recognized when constructing a [`CacheCluster`](crate::CacheCluster).
///
/// # Default Values
/// - `request_timeout_ms`: `None` (sub-requests are never timed out)
/// - `stats_report_interval_ms`: `None` (no periodic stats logging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Per-node sub-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Interval between stats log lines in milliseconds
    pub stats_report_interval_ms: Option<u64>,
}

impl ClusterConfig {
    /// Config with a per-sub-request timeout.
    ///
    /// The timeout is truncated to whole milliseconds, so anything under
    /// 1ms becomes 0ms. Durations beyond `u64::MAX` milliseconds saturate.
    pub fn with_request_timeout(timeout: Duration) -> Self {
        Self {
            request_timeout_ms: Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            ..Default::default()
        }
    }

    /// Parse a JSON document such as `{"request_timeout_ms": 200}`.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::Configuration(e.to_string()))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn stats_report_interval(&self) -> Option<Duration> {
        self.stats_report_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Options handed to a [`ConnectionFactory`](crate::ConnectionFactory) for
/// every connection it creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Upper bound on a single `connect()` attempt in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Backend-specific parameters, passed through untouched
    pub params: HashMap<String, String>,
}

impl ConnectionOptions {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-node registration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Share of the key space relative to other nodes
    pub weight: u32,

    /// Recorded and reported only; it has no effect on routing or pooling.
    pub min_connections: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            weight: 1,
            min_connections: 0,
        }
    }
}

impl NodeOptions {
    pub fn with_weight(weight: u32) -> Self {
        Self {
            weight,
            ..Default::default()
        }
    }
}
