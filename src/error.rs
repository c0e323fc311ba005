use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Cluster destroyed")]
    ClusterDestroyed,

    #[error("Connection destroyed")]
    Destroyed,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    PartialResult(Box<PartialResultError>),
}

impl CacheError {
    /// True for the timeout kind, which the cluster counts separately.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout(_))
    }

    /// True when the error means the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CacheError::Connectivity(_) | CacheError::Io(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl From<PartialResultError> for CacheError {
    fn from(err: PartialResultError) -> Self {
        CacheError::PartialResult(Box::new(err))
    }
}

/// Outcome of a batch operation in which at least one node failed.
///
/// `data` holds every key whose owning node answered. For `mget` a value of
/// `None` means the key was absent on a reachable node; for `mset` every
/// entry is `Some` with the value that was written. `errors` maps each key
/// whose owning node failed to that node's error.
#[derive(Error, Debug, Clone, Default)]
#[error("partial result: {} keys succeeded, {} keys failed", .data.len(), .errors.len())]
pub struct PartialResultError {
    data: HashMap<String, Option<Bytes>>,
    errors: HashMap<String, CacheError>,
}

impl PartialResultError {
    pub fn new(
        data: HashMap<String, Option<Bytes>>,
        errors: HashMap<String, CacheError>,
    ) -> Self {
        Self { data, errors }
    }

    pub fn data(&self) -> &HashMap<String, Option<Bytes>> {
        &self.data
    }

    pub fn errors(&self) -> &HashMap<String, CacheError> {
        &self.errors
    }

    pub fn into_parts(self) -> (HashMap<String, Option<Bytes>>, HashMap<String, CacheError>) {
        (self.data, self.errors)
    }
}
