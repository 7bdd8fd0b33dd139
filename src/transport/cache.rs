//! Bounded connection cache keyed by destination locality.
//!
//! Every send leases a [`ConnectionHandle`] from the cache and returns it
//! afterwards. Capacity bounds the number of simultaneously leased
//! connections: an `acquire` beyond capacity waits up to the configured
//! timeout and then fails with [`BootError::ConnectionExhausted`] rather
//! than blocking its caller indefinitely. Released connections are kept on
//! a small per-destination idle list and reused by later leases; a
//! connection that failed mid-send is discarded, never recycled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::constants::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CACHE_CAPACITY, DEFAULT_IDLE_PER_DESTINATION};
use crate::error::{BootError, ConnectionExhaustedSnafu};
use crate::locality::LocalityAddress;
use crate::transport::{Connection, Transport};

/// Capacity and timing bounds for the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCacheConfig {
    /// Maximum simultaneously leased connections.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Bounded wait for a lease, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Idle connections retained per destination for reuse.
    #[serde(default = "default_idle_per_destination")]
    pub idle_per_destination: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64
}

fn default_idle_per_destination() -> usize {
    DEFAULT_IDLE_PER_DESTINATION
}

impl Default for ConnectionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_per_destination: default_idle_per_destination(),
        }
    }
}

impl ConnectionCacheConfig {
    /// Lease wait bound as a `Duration`.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// A leased transport connection.
///
/// Return it with [`ConnectionCache::release`] after a successful send, or
/// [`ConnectionCache::discard`] after a failure. Dropping the handle frees
/// its capacity slot and closes the connection.
pub struct ConnectionHandle {
    dest: LocalityAddress,
    conn: Box<dyn Connection>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("dest", &self.dest)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Send one parcel payload over the leased connection.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), BootError> {
        self.conn.send(payload).await
    }

    /// The destination this lease is for.
    pub fn destination(&self) -> &LocalityAddress {
        &self.dest
    }
}

/// Bounded pool of reusable transport connections.
pub struct ConnectionCache {
    transport: Arc<dyn Transport>,
    config: ConnectionCacheConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<HashMap<LocalityAddress, Vec<Box<dyn Connection>>>>,
}

impl ConnectionCache {
    /// Create a cache that dials through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionCacheConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.capacity));
        Self {
            transport,
            config,
            permits,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Lease a connection to `dest`, reusing an idle one when available.
    ///
    /// Waits at most the configured acquire timeout for a capacity slot.
    pub async fn acquire(&self, dest: &LocalityAddress) -> Result<ConnectionHandle, BootError> {
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Closed semaphore or expired wait both mean no slot within bound.
            Ok(Err(_)) | Err(_) => {
                return ConnectionExhaustedSnafu {
                    dest: dest.to_string(),
                    capacity: self.config.capacity,
                }
                .fail();
            }
        };

        let reused = self
            .idle
            .lock()
            .await
            .get_mut(dest)
            .and_then(|conns| conns.pop());

        let conn = match reused {
            Some(conn) => {
                debug!(dest = %dest, "reusing idle connection");
                conn
            }
            // Dial failure drops the permit and frees the slot.
            None => self.transport.connect(dest).await?,
        };

        Ok(ConnectionHandle {
            dest: dest.clone(),
            conn,
            _permit: permit,
        })
    }

    /// Return a healthy connection for reuse.
    ///
    /// The capacity slot is freed; the connection joins the idle list
    /// unless the per-destination bound is already met.
    pub async fn release(&self, handle: ConnectionHandle) {
        let ConnectionHandle { dest, conn, _permit } = handle;
        let mut idle = self.idle.lock().await;
        let slot = idle.entry(dest).or_default();
        if slot.len() < self.config.idle_per_destination {
            slot.push(conn);
        }
    }

    /// Drop a connection after a failure. It is closed, not recycled.
    pub fn discard(&self, handle: ConnectionHandle) {
        debug!(dest = %handle.dest, "discarding failed connection");
        drop(handle);
    }

    /// Configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Total idle connections currently cached.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.values().map(Vec::len).sum()
    }
}
