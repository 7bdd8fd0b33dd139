//! Transport capabilities: dialing, framed parcel send, inbound listener.
//!
//! The barrier and protocol treat the transport as a pair of capabilities:
//! [`Transport::connect`] to open a connection and [`Connection::send`] to
//! push one framed parcel. The production implementation is a plain TCP
//! parcelport; tests substitute [`crate::testing::MemoryTransport`].
//!
//! Connect-level retry policy lives here, not in the barrier: a dial is
//! retried a bounded number of times with exponential backoff before the
//! destination is reported unreachable.

pub mod cache;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{
    CONNECT_RETRY_BACKOFF_BASE_MS, CONNECT_TIMEOUT, MAX_CONNECT_RETRIES, MAX_PARCEL_SIZE,
};
use crate::error::{BootError, IoSnafu, UnreachableSnafu};
use crate::locality::LocalityAddress;
use crate::wire;

/// Capability to open connections to remote localities.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `dest`.
    ///
    /// May retry internally with bounded backoff; a failure after the last
    /// attempt surfaces as [`BootError::Unreachable`].
    async fn connect(&self, dest: &LocalityAddress) -> Result<Box<dyn Connection>, BootError>;
}

/// One open transport session to a single destination.
#[async_trait]
pub trait Connection: Send {
    /// Send one framed parcel payload.
    async fn send(&mut self, payload: &[u8]) -> Result<(), BootError>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Connection")
    }
}

/// Run `task` after `delay` on the runtime's timer.
///
/// Deferral capability for callers that want delayed diagnostics or
/// retries around the bootstrap core; the core itself never reschedules
/// failed parcels.
pub fn schedule<F>(delay: Duration, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    })
}

/// Tunables for the TCP parcelport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Timeout for a single connect attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Connect attempts before a destination is reported unreachable.
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,
    /// Base backoff between connect attempts, in milliseconds.
    #[serde(default = "default_connect_backoff_base_ms")]
    pub connect_backoff_base_ms: u64,
    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_parcel_size")]
    pub max_parcel_size: usize,
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT.as_millis() as u64
}

fn default_max_connect_retries() -> u32 {
    MAX_CONNECT_RETRIES
}

fn default_connect_backoff_base_ms() -> u64 {
    CONNECT_RETRY_BACKOFF_BASE_MS
}

fn default_max_parcel_size() -> usize {
    MAX_PARCEL_SIZE
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_connect_retries: default_max_connect_retries(),
            connect_backoff_base_ms: default_connect_backoff_base_ms(),
            max_parcel_size: default_max_parcel_size(),
        }
    }
}

impl TcpTransportConfig {
    /// Connect attempt timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// TCP parcelport: length-prefixed postcard frames over a stream socket.
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Create a transport with the given tunables.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TcpTransportConfig::default())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, dest: &LocalityAddress) -> Result<Box<dyn Connection>, BootError> {
        let endpoint = dest.endpoint();
        let mut attempts = 0;

        let stream = loop {
            attempts += 1;

            let outcome =
                match tokio::time::timeout(
                    self.config.connect_timeout(),
                    TcpStream::connect(endpoint.as_str()),
                )
                .await
                {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout_ms
                    )),
                };

            match outcome {
                Ok(stream) => break stream,
                Err(reason) if attempts < self.config.max_connect_retries => {
                    let backoff = Duration::from_millis(
                        self.config.connect_backoff_base_ms * (1 << (attempts - 1)),
                    );
                    warn!(
                        dest = %dest,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(reason) => {
                    return UnreachableSnafu {
                        dest: dest.to_string(),
                        reason: format!("{reason} ({attempts} attempts)"),
                    }
                    .fail();
                }
            }
        };

        // Bootstrap frames are tiny; coalescing delays the rendezvous.
        let _ = stream.set_nodelay(true);

        debug!(dest = %dest, attempts, "connected");
        Ok(Box::new(TcpConnection {
            dest: dest.clone(),
            stream,
            max_parcel_size: self.config.max_parcel_size,
        }))
    }
}

struct TcpConnection {
    dest: LocalityAddress,
    stream: TcpStream,
    max_parcel_size: usize,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, payload: &[u8]) -> Result<(), BootError> {
        let context = format!("send to {}", self.dest);
        wire::write_frame(&mut self.stream, payload, self.max_parcel_size, &context).await
    }
}

/// Handle to the inbound parcel listener.
pub struct ParcelListener {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ParcelListener {
    /// The address the listener actually bound (port resolved if 0 was
    /// requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. In-flight per-connection readers finish on their
    /// own when their peers close or the shutdown token fires.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;
    }
}

/// Bind `endpoint` and forward every inbound frame body to `inbound`.
///
/// Each accepted connection gets its own reader task that runs until the
/// peer closes the stream, a frame is malformed, or `shutdown` fires.
/// Accept errors are logged and accepting continues; one bad peer must not
/// take the rendezvous point down.
pub async fn spawn_parcel_listener(
    endpoint: &str,
    inbound: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
    max_parcel_size: usize,
) -> Result<ParcelListener, BootError> {
    let listener = TcpListener::bind(endpoint).await.context(IoSnafu {
        context: format!("bind {endpoint}"),
    })?;
    let local_addr = listener.local_addr().context(IoSnafu {
        context: format!("bind {endpoint}"),
    })?;

    let accept_task = tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted bootstrap connection");
                    let inbound = inbound.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(read_parcels(stream, peer, inbound, shutdown, max_parcel_size));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                }
            }
        }
    });

    Ok(ParcelListener {
        local_addr,
        accept_task,
    })
}

async fn read_parcels(
    mut stream: TcpStream,
    peer: SocketAddr,
    inbound: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
    max_parcel_size: usize,
) {
    let context = format!("receive from {peer}");
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = wire::read_frame(&mut stream, max_parcel_size, &context) => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                if inbound.send(payload).await.is_err() {
                    // Receiver side of the bootstrap core is gone.
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%peer, error = %err, "dropping connection after framing error");
                break;
            }
        }
    }
}
