//! Root and joining roles of the bootstrap rendezvous.
//!
//! Both roles sit on top of the same [`BootBarrier`], injected at
//! construction rather than reached through any process-wide accessor.
//!
//! A joining locality registers with the pre-configured root address (the
//! one destination that is dialable while its barrier is closed) and then
//! waits; the root's acknowledgment parcel opens the joiner's barrier.
//!
//! The root records each valid registration and assigns it the next
//! locality id (the root itself is locality 0). When the registered count
//! reaches the expected quorum, the root opens its own barrier FIRST and
//! only then sends acknowledgments: joiner addresses become dispatchable
//! exactly when the barrier opens, so the order is load-bearing, not
//! cosmetic. Registrations arriving after the flip are acknowledged
//! through the immediate-dispatch path; the barrier never recloses.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::barrier::{BootBarrier, Parcel};
use crate::config::RoleConfig;
use crate::error::{BootError, ProtocolViolationSnafu};
use crate::locality::LocalityAddress;
use crate::wire::BootMessage;

/// A locality the root has registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredPeer {
    /// Address the peer asked to be acknowledged at.
    pub addr: LocalityAddress,
    /// Locality id the root assigned to it.
    pub locality_id: u32,
}

struct RootState {
    expected_peers: u32,
    peers: Vec<RegisteredPeer>,
    // Locality ids already claimed for acknowledgment; each joiner is
    // acked exactly once even under concurrent inbound handling.
    acked: HashSet<u32>,
}

#[derive(Default)]
struct JoinState {
    locality_id: Option<u32>,
}

enum RoleState {
    Root(Mutex<RootState>),
    Joining(Mutex<JoinState>),
}

/// Role logic layered over one injected [`BootBarrier`].
pub struct BootstrapProtocol {
    barrier: Arc<BootBarrier>,
    local: LocalityAddress,
    role: RoleState,
}

impl BootstrapProtocol {
    /// Create the role selected by `role` for the locality at `local`.
    pub fn new(barrier: Arc<BootBarrier>, local: LocalityAddress, role: RoleConfig) -> Self {
        let role = match role {
            RoleConfig::Root { expected_peers } => RoleState::Root(Mutex::new(RootState {
                expected_peers,
                peers: Vec::new(),
                acked: HashSet::new(),
            })),
            RoleConfig::Joining => RoleState::Joining(Mutex::new(JoinState::default())),
        };
        Self {
            barrier,
            local,
            role,
        }
    }

    /// The barrier this protocol drives.
    pub fn barrier(&self) -> &Arc<BootBarrier> {
        &self.barrier
    }

    /// This locality's address.
    pub fn local(&self) -> &LocalityAddress {
        &self.local
    }

    /// The locality id, once known. The root is always 0; a joiner learns
    /// its id from the acknowledgment.
    pub async fn locality_id(&self) -> Option<u32> {
        match &self.role {
            RoleState::Root(_) => Some(0),
            RoleState::Joining(state) => state.lock().await.locality_id,
        }
    }

    /// How many peers the root has registered. `None` on a joiner.
    pub async fn registered_count(&self) -> Option<u32> {
        match &self.role {
            RoleState::Root(state) => Some(state.lock().await.peers.len() as u32),
            RoleState::Joining(_) => None,
        }
    }

    /// Joining role: announce this locality to the root.
    ///
    /// Travels on the always-dialable bootstrap path; the caller follows
    /// up with `barrier().wait_timeout(..)` and treats expiry as a fatal
    /// startup error.
    pub async fn register(&self) -> Result<(), BootError> {
        if matches!(self.role, RoleState::Root(_)) {
            return ProtocolViolationSnafu {
                sender: self.local.to_string(),
                reason: "the root locality does not register with itself".to_string(),
            }
            .fail();
        }

        let message = BootMessage::Register {
            sender: self.local.clone(),
            generation: self.local.generation,
        };
        let bootstrap = self.barrier.bootstrap_address().clone();
        info!(local = %self.local, root = %bootstrap, "registering with root locality");
        self.barrier
            .apply(Parcel::new(bootstrap, message.encode()?))
            .await
    }

    /// Decode and handle one inbound bootstrap parcel payload.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<(), BootError> {
        self.handle_message(BootMessage::decode(payload)?).await
    }

    /// Handle one inbound bootstrap message.
    ///
    /// A [`BootError::ProtocolViolation`] rejects the message without
    /// advancing any registration state.
    pub async fn handle_message(&self, message: BootMessage) -> Result<(), BootError> {
        match (&self.role, message) {
            (RoleState::Root(state), BootMessage::Register { sender, generation }) => {
                self.handle_register(state, sender, generation).await
            }
            (RoleState::Joining(state), BootMessage::Ack { locality_id, registered_peers }) => {
                info!(locality_id, registered_peers, "acknowledged by root");
                state.lock().await.locality_id = Some(locality_id);
                self.barrier.notify().await;
                Ok(())
            }
            (RoleState::Root(_), BootMessage::Ack { .. }) => ProtocolViolationSnafu {
                sender: "unknown".to_string(),
                reason: "root locality received an acknowledgment".to_string(),
            }
            .fail(),
            (RoleState::Joining(_), BootMessage::Register { sender, .. }) => {
                ProtocolViolationSnafu {
                    sender: sender.to_string(),
                    reason: "joining locality received a registration".to_string(),
                }
                .fail()
            }
        }
    }

    async fn handle_register(
        &self,
        state: &Mutex<RootState>,
        sender: LocalityAddress,
        generation: u32,
    ) -> Result<(), BootError> {
        if !sender.is_routable() {
            return ProtocolViolationSnafu {
                sender: sender.to_string(),
                reason: "unroutable sender endpoint".to_string(),
            }
            .fail();
        }
        if generation != sender.generation {
            return ProtocolViolationSnafu {
                sender: sender.to_string(),
                reason: format!(
                    "generation echo {generation} does not match address generation {}",
                    sender.generation
                ),
            }
            .fail();
        }

        let (peer, registered, crossed_quorum) = {
            let mut root = state.lock().await;
            if root.peers.iter().any(|peer| peer.addr == sender) {
                return ProtocolViolationSnafu {
                    sender: sender.to_string(),
                    reason: "duplicate registration".to_string(),
                }
                .fail();
            }

            let peer = RegisteredPeer {
                addr: sender,
                locality_id: root.peers.len() as u32 + 1,
            };
            root.peers.push(peer.clone());
            let registered = root.peers.len() as u32;
            info!(
                peer = %peer.addr,
                locality_id = peer.locality_id,
                registered,
                expected = root.expected_peers,
                "registered locality"
            );
            let crossed = root.expected_peers > 0 && registered == root.expected_peers;
            (peer, registered, crossed)
        };

        if crossed_quorum {
            // Open locally before any outbound acknowledgment: joiner
            // addresses only become dispatchable once the barrier is open.
            info!(registered, "quorum reached, opening barrier");
            self.barrier.notify().await;
        }

        // The quorum-crossing call acknowledges everyone registered so
        // far (snapshot taken after the flip, so a registration racing
        // the flip lands in exactly one of the two paths). Anything
        // after the flip acknowledges just itself, through the
        // immediate-dispatch path; the barrier never recloses.
        let candidates = if crossed_quorum {
            state.lock().await.peers.clone()
        } else if self.barrier.is_open().await {
            vec![peer]
        } else {
            Vec::new()
        };

        for candidate in candidates {
            let (claimed, registered_now) = {
                let mut root = state.lock().await;
                let claimed = root.acked.insert(candidate.locality_id);
                (claimed, root.peers.len() as u32)
            };
            if !claimed {
                continue;
            }
            if let Err(error) = self.send_ack(&candidate, registered_now).await {
                // Partial failure: the remaining joiners still get their
                // acknowledgments.
                warn!(peer = %candidate.addr, %error, "failed to acknowledge joiner");
            }
        }

        Ok(())
    }

    async fn send_ack(&self, peer: &RegisteredPeer, registered: u32) -> Result<(), BootError> {
        let message = BootMessage::Ack {
            locality_id: peer.locality_id,
            registered_peers: registered,
        };
        self.barrier
            .apply(Parcel::new(peer.addr.clone(), message.encode()?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use crate::transport::cache::{ConnectionCache, ConnectionCacheConfig};
    use tokio::sync::mpsc;

    fn root_harness(expected_peers: u32) -> (Arc<BootstrapProtocol>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let cache = Arc::new(ConnectionCache::new(
            Arc::new(transport.clone()),
            ConnectionCacheConfig::default(),
        ));
        let (failure_tx, _failure_rx) = mpsc::unbounded_channel();
        let root_addr = LocalityAddress::new("root", 7910);
        let barrier = Arc::new(BootBarrier::new(root_addr.clone(), cache, failure_tx));
        let protocol = Arc::new(BootstrapProtocol::new(
            barrier,
            root_addr,
            RoleConfig::Root { expected_peers },
        ));
        (protocol, transport)
    }

    fn register(addr: &LocalityAddress) -> BootMessage {
        BootMessage::Register {
            sender: addr.clone(),
            generation: addr.generation,
        }
    }

    #[tokio::test]
    async fn quorum_opens_barrier_and_acknowledges_every_joiner() {
        let (protocol, transport) = root_harness(3);
        let joiners: Vec<_> = (1..=3)
            .map(|i| LocalityAddress::new(format!("joiner-{i}"), 7000 + i))
            .collect();

        for joiner in &joiners {
            protocol.handle_message(register(joiner)).await.unwrap();
        }

        assert!(protocol.barrier().is_open().await);
        assert_eq!(protocol.registered_count().await, Some(3));

        for (i, joiner) in joiners.iter().enumerate() {
            let acks = transport.sent_to(joiner);
            assert_eq!(acks.len(), 1, "joiner {joiner} not acknowledged exactly once");
            let ack = BootMessage::decode(&acks[0]).unwrap();
            assert_eq!(
                ack,
                BootMessage::Ack {
                    locality_id: i as u32 + 1,
                    registered_peers: 3,
                }
            );
        }
    }

    #[tokio::test]
    async fn below_quorum_nothing_is_acknowledged() {
        let (protocol, transport) = root_harness(3);
        let joiner = LocalityAddress::new("joiner-1", 7001);

        protocol.handle_message(register(&joiner)).await.unwrap();

        assert!(!protocol.barrier().is_open().await);
        assert!(transport.sent_to(&joiner).is_empty());
    }

    #[tokio::test]
    async fn late_joiner_is_acknowledged_through_the_immediate_path() {
        let (protocol, transport) = root_harness(1);
        let first = LocalityAddress::new("joiner-1", 7001);
        let late = LocalityAddress::new("joiner-2", 7002);

        protocol.handle_message(register(&first)).await.unwrap();
        assert!(protocol.barrier().is_open().await);

        protocol.handle_message(register(&late)).await.unwrap();

        assert_eq!(protocol.barrier().pending_len().await, 0);
        let acks = transport.sent_to(&late);
        assert_eq!(acks.len(), 1);
        assert_eq!(
            BootMessage::decode(&acks[0]).unwrap(),
            BootMessage::Ack {
                locality_id: 2,
                registered_peers: 2,
            }
        );
        // The barrier opened once and stayed open.
        assert_eq!(protocol.barrier().flush_count(), 1);
    }

    #[tokio::test]
    async fn violations_do_not_advance_the_registered_count() {
        let (protocol, _transport) = root_harness(3);

        let unroutable = LocalityAddress::new("", 0);
        let err = protocol.handle_message(register(&unroutable)).await.unwrap_err();
        assert!(matches!(err, BootError::ProtocolViolation { .. }));

        let joiner = LocalityAddress::new("joiner-1", 7001).with_generation(2);
        let err = protocol
            .handle_message(BootMessage::Register {
                sender: joiner.clone(),
                generation: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::ProtocolViolation { .. }));

        protocol.handle_message(register(&joiner)).await.unwrap();
        let err = protocol.handle_message(register(&joiner)).await.unwrap_err();
        assert!(matches!(err, BootError::ProtocolViolation { .. }));

        assert_eq!(protocol.registered_count().await, Some(1));
        assert!(!protocol.barrier().is_open().await);
    }

    #[tokio::test]
    async fn ack_at_root_is_rejected() {
        let (protocol, _transport) = root_harness(3);
        let err = protocol
            .handle_message(BootMessage::Ack {
                locality_id: 1,
                registered_peers: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::ProtocolViolation { .. }));
    }
}
