//! Runtime wiring for one bootstrap episode.
//!
//! [`bootstrap`] builds the transport, cache, barrier and protocol for a
//! locality, binds the inbound parcel listener, and kicks off the role's
//! side of the rendezvous. The returned [`BootHandle`] owns everything and
//! tears it down cleanly. One episode per process lifetime; nothing is
//! persisted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::barrier::{BootBarrier, FailedParcel};
use crate::config::{BootConfig, RoleConfig};
use crate::constants::INBOUND_CHANNEL_CAPACITY;
use crate::error::BootError;
use crate::protocol::BootstrapProtocol;
use crate::transport::cache::ConnectionCache;
use crate::transport::{self, ParcelListener, TcpTransport, Transport};

/// Handle to a running bootstrap episode.
pub struct BootHandle {
    /// The merged configuration the episode runs with.
    pub config: BootConfig,
    /// The one barrier instance, injected into every consumer.
    pub barrier: Arc<BootBarrier>,
    /// Role logic driving the barrier.
    pub protocol: Arc<BootstrapProtocol>,
    /// Deferred parcels whose flush delivery failed, for diagnostics.
    pub failures: mpsc::UnboundedReceiver<FailedParcel>,
    listener: ParcelListener,
    inbound_task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for BootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootHandle")
            .field("local_addr", &self.listener.local_addr())
            .finish_non_exhaustive()
    }
}

impl BootHandle {
    /// The address the parcel listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Block until the barrier opens, bounded by the configured deadline.
    ///
    /// Expiry means this locality could not establish distributed
    /// addressing; startup should fail.
    pub async fn complete(&self) -> Result<(), BootError> {
        self.barrier.wait_timeout(self.config.boot_timeout()).await
    }

    /// Tear the episode down: stop accepting, stop the inbound loop.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down bootstrap core");
        self.shutdown.cancel();
        self.listener.shutdown().await;
        self.inbound_task
            .await
            .context("inbound dispatch task panicked")?;
        Ok(())
    }
}

/// Bootstrap over the production TCP parcelport.
pub async fn bootstrap(config: BootConfig) -> Result<BootHandle> {
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.transport.clone()));
    bootstrap_with_transport(config, transport).await
}

/// Bootstrap with an injected transport (tests use the in-memory one).
pub async fn bootstrap_with_transport(
    mut config: BootConfig,
    transport: Arc<dyn Transport>,
) -> Result<BootHandle> {
    config
        .validate()
        .context("configuration validation failed")?;

    let shutdown = CancellationToken::new();
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let listener = transport::spawn_parcel_listener(
        &config.local.endpoint(),
        inbound_tx,
        shutdown.clone(),
        config.transport.max_parcel_size,
    )
    .await
    .with_context(|| format!("failed to bind parcel listener on {}", config.local))?;

    // Advertise the OS-assigned port when 0 was requested; the root must
    // be able to dial the address a registration carries.
    if config.local.port == 0 {
        config.local = config.local.clone().with_port(listener.local_addr().port());
    }
    info!(local = %config.local, role = ?config.role, "parcel listener bound");

    let cache = Arc::new(ConnectionCache::new(transport, config.cache.clone()));
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let barrier = Arc::new(BootBarrier::new(
        config.bootstrap.clone(),
        cache,
        failure_tx,
    ));
    let protocol = Arc::new(BootstrapProtocol::new(
        Arc::clone(&barrier),
        config.local.clone(),
        config.role,
    ));

    let inbound_task = {
        let protocol = Arc::clone(&protocol);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = inbound_rx.recv() => next,
                };
                match next {
                    Some(payload) => {
                        if let Err(error) = protocol.handle_payload(&payload).await {
                            warn!(%error, "rejected bootstrap parcel");
                        }
                    }
                    None => break,
                }
            }
        })
    };

    match config.role {
        RoleConfig::Root { expected_peers: 0 } => {
            info!("open-ended root, opening barrier immediately");
            barrier.notify().await;
        }
        RoleConfig::Root { expected_peers } => {
            info!(expected_peers, "root waiting for registrations");
        }
        RoleConfig::Joining => {
            protocol
                .register()
                .await
                .context("failed to register with root locality")?;

            // Halfway through the deadline, say so if the ack still has
            // not arrived; the timeout itself stays with the caller.
            let barrier = Arc::clone(&barrier);
            let half = config.boot_timeout() / 2;
            transport::schedule(half, async move {
                if !barrier.is_open().await {
                    warn!("still waiting for acknowledgment from root locality");
                }
            });
        }
    }

    Ok(BootHandle {
        config,
        barrier,
        protocol,
        failures: failure_rx,
        listener,
        inbound_task,
        shutdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::LocalityAddress;
    use crate::testing::MemoryTransport;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let mut config = BootConfig::default();
        config.bootstrap = LocalityAddress::new("", 0);
        let err = bootstrap(config).await.unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[tokio::test]
    async fn open_ended_root_starts_open() {
        let mut config = BootConfig::default();
        config.role = RoleConfig::Root { expected_peers: 0 };
        config.bootstrap = LocalityAddress::new("127.0.0.1", 7910);

        let transport = MemoryTransport::new();
        let handle = bootstrap_with_transport(config, Arc::new(transport))
            .await
            .unwrap();
        assert!(handle.barrier.is_open().await);
        handle.complete().await.unwrap();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn port_zero_is_resolved_before_advertising() {
        let mut config = BootConfig::default();
        config.role = RoleConfig::Root { expected_peers: 1 };

        let transport = MemoryTransport::new();
        let handle = bootstrap_with_transport(config, Arc::new(transport))
            .await
            .unwrap();
        assert_ne!(handle.config.local.port, 0);
        assert_eq!(handle.config.local.port, handle.local_addr().port());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn joining_locality_registers_on_startup() {
        let root_addr = LocalityAddress::new("root", 7910);
        let mut config = BootConfig::default();
        config.role = RoleConfig::Joining;
        config.bootstrap = root_addr.clone();

        let transport = MemoryTransport::new();
        let handle = bootstrap_with_transport(config, Arc::new(transport.clone()))
            .await
            .unwrap();

        let sent = transport.sent_to(&root_addr);
        assert_eq!(sent.len(), 1);
        let message = crate::wire::BootMessage::decode(&sent[0]).unwrap();
        assert!(matches!(
            message,
            crate::wire::BootMessage::Register { .. }
        ));
        handle.shutdown().await.unwrap();
    }
}
