use crate::cache::{CacheInstance, CacheItem, CacheKey};
use crate::error::CacheError;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle state of a [`ConnectionWrapper`].
///
/// ```text
/// Disconnected --connect()--> Connecting --ok--> Connected
///      ^                          |                  |
///      +---------- error ---------+-- error/disconnect()
///
/// any --destroy()--> Destroyed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Destroyed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Notification published on every externally visible transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Destroyed,
}

/// Owns one raw backend connection and gates access to it on the
/// connection state.
///
/// Data calls are delegated only while `Connected`; otherwise they fail
/// fast with a connectivity error. A connection-level failure from the raw
/// backend drops the wrapper back to `Disconnected`. Reconnecting is always
/// up to the caller.
pub struct ConnectionWrapper {
    uri: String,
    raw: Arc<dyn CacheInstance>,
    connect_timeout: Option<Duration>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionWrapper {
    pub fn new(uri: impl Into<String>, raw: Arc<dyn CacheInstance>) -> Self {
        Self::with_connect_timeout(uri, raw, None)
    }

    pub fn with_connect_timeout(
        uri: impl Into<String>,
        raw: Arc<dyn CacheInstance>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            uri: uri.into(),
            raw,
            connect_timeout,
            state,
            events,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receive lifecycle events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Observe the state itself, including `Connecting`
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move to `next` if the current state satisfies `allowed`.
    ///
    /// Returns the state observed before the attempt.
    fn transition(
        &self,
        allowed: impl FnOnce(ConnectionState) -> bool,
        next: ConnectionState,
    ) -> (bool, ConnectionState) {
        let mut observed = next;
        let changed = self.state.send_if_modified(|state| {
            observed = *state;
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        });
        (changed, observed)
    }

    fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn ensure_connected(&self) -> Result<(), CacheError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Destroyed => Err(CacheError::Destroyed),
            state => Err(CacheError::Connectivity(format!(
                "connection to {} is {}",
                self.uri, state
            ))),
        }
    }

    fn observe<T>(&self, result: Result<T, CacheError>) -> Result<T, CacheError> {
        if let Err(err) = &result {
            if err.is_connection_error() {
                let (changed, _) = self.transition(
                    |state| state == ConnectionState::Connected,
                    ConnectionState::Disconnected,
                );
                if changed {
                    tracing::warn!("Connection to {} lost: {}", self.uri, err);
                    self.publish(ConnectionEvent::Disconnected);
                }
            }
        }
        result
    }

    async fn wait_for_connect(&self) -> Result<(), CacheError> {
        let mut receiver = self.state.subscribe();
        let settled = receiver
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected);

        match settled {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Destroyed => Err(CacheError::Destroyed),
            state => Err(CacheError::Connectivity(format!(
                "connection to {} is {}",
                self.uri, state
            ))),
        }
    }
}

#[async_trait::async_trait]
impl CacheInstance for ConnectionWrapper {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.ensure_connected()?;
        let result = self.raw.get(key).await;
        self.observe(result)
    }

    async fn mget(&self, keys: &[CacheKey]) -> Result<Vec<Option<Bytes>>, CacheError> {
        self.ensure_connected()?;
        let result = self.raw.mget(keys).await;
        self.observe(result)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_connected()?;
        let result = self.raw.set(key, value, ttl).await;
        self.observe(result)
    }

    async fn mset(&self, items: &[CacheItem], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_connected()?;
        let result = self.raw.mset(items, ttl).await;
        self.observe(result)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_connected()?;
        let result = self.raw.del(key).await;
        self.observe(result)
    }

    fn is_available(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect the raw backend.
    ///
    /// A no-op when already connected; when another connect is in flight,
    /// waits for it to settle and reports its outcome.
    async fn connect(&self) -> Result<(), CacheError> {
        let (started, observed) = self.transition(
            |state| state == ConnectionState::Disconnected,
            ConnectionState::Connecting,
        );
        if !started {
            return match observed {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Destroyed => Err(CacheError::Destroyed),
                _ => self.wait_for_connect().await,
            };
        }

        tracing::debug!("Connecting to {}", self.uri);
        let attempt = self.raw.connect();
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(CacheError::Timeout(limit))),
            None => attempt.await,
        };

        match result {
            Ok(()) => {
                let (connected, observed) = self.transition(
                    |state| state == ConnectionState::Connecting,
                    ConnectionState::Connected,
                );
                if connected {
                    tracing::info!("Connected to {}", self.uri);
                    self.publish(ConnectionEvent::Connected);
                    Ok(())
                } else if observed == ConnectionState::Destroyed {
                    Err(CacheError::Destroyed)
                } else {
                    Err(CacheError::Connectivity(format!(
                        "connection to {} was closed while connecting",
                        self.uri
                    )))
                }
            }
            Err(err) => {
                self.transition(
                    |state| state == ConnectionState::Connecting,
                    ConnectionState::Disconnected,
                );
                tracing::warn!("Failed to connect to {}: {}", self.uri, err);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        let (changed, _) = self.transition(
            |state| matches!(state, ConnectionState::Connected | ConnectionState::Connecting),
            ConnectionState::Disconnected,
        );
        if changed {
            self.raw.disconnect().await;
            tracing::info!("Disconnected from {}", self.uri);
            self.publish(ConnectionEvent::Disconnected);
        }
    }

    async fn destroy(&self) {
        let previous = self.state.send_replace(ConnectionState::Destroyed);
        if previous != ConnectionState::Destroyed {
            self.raw.destroy().await;
            tracing::info!("Destroyed connection to {}", self.uri);
            self.publish(ConnectionEvent::Destroyed);
        }
    }
}
