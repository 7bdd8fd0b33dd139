//! Test support: an in-memory transport with scriptable failures.
//!
//! [`MemoryTransport`] records every send and can be told to fail dials or
//! sends for specific destinations, which is how the flush partial-failure
//! paths are exercised without real sockets. Destinations can optionally
//! be routed to an in-process inbox so two protocol instances can talk to
//! each other inside one test.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BootError, UnreachableSnafu};
use crate::locality::LocalityAddress;
use crate::transport::{Connection, Transport};

#[derive(Default)]
struct MemoryState {
    sent: Mutex<Vec<(LocalityAddress, Vec<u8>)>>,
    dials: Mutex<HashMap<LocalityAddress, u32>>,
    fail_connect: Mutex<HashSet<LocalityAddress>>,
    fail_send: Mutex<HashSet<LocalityAddress>>,
    inboxes: Mutex<HashMap<LocalityAddress, mpsc::UnboundedSender<Vec<u8>>>>,
    live_connections: AtomicU32,
}

/// In-memory [`Transport`] for tests. Cloning shares the recorded state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dials to `dest` fail with [`BootError::Unreachable`].
    pub fn fail_connect_to(&self, dest: &LocalityAddress) {
        self.state.fail_connect.lock().unwrap().insert(dest.clone());
    }

    /// Make sends to `dest` fail with [`BootError::Unreachable`].
    pub fn fail_send_to(&self, dest: &LocalityAddress) {
        self.state.fail_send.lock().unwrap().insert(dest.clone());
    }

    /// Stop failing dials/sends to `dest`.
    pub fn heal(&self, dest: &LocalityAddress) {
        self.state.fail_connect.lock().unwrap().remove(dest);
        self.state.fail_send.lock().unwrap().remove(dest);
    }

    /// Every payload sent so far, in send-completion order.
    pub fn sent(&self) -> Vec<(LocalityAddress, Vec<u8>)> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Payloads sent to one destination, in order.
    pub fn sent_to(&self, dest: &LocalityAddress) -> Vec<Vec<u8>> {
        self.state
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == dest)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// How many times `dest` was dialed.
    pub fn dial_count(&self, dest: &LocalityAddress) -> u32 {
        self.state
            .dials
            .lock()
            .unwrap()
            .get(dest)
            .copied()
            .unwrap_or(0)
    }

    /// Connections currently open (dialed and not yet dropped).
    pub fn live_connections(&self) -> u32 {
        self.state.live_connections.load(Ordering::Relaxed)
    }

    /// Route sends addressed to `dest` into an in-process inbox.
    pub fn route(&self, dest: &LocalityAddress) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.inboxes.lock().unwrap().insert(dest.clone(), tx);
        rx
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, dest: &LocalityAddress) -> Result<Box<dyn Connection>, BootError> {
        if self.state.fail_connect.lock().unwrap().contains(dest) {
            return UnreachableSnafu {
                dest: dest.to_string(),
                reason: "injected connect failure".to_string(),
            }
            .fail();
        }

        *self
            .state
            .dials
            .lock()
            .unwrap()
            .entry(dest.clone())
            .or_insert(0) += 1;
        self.state.live_connections.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryConnection {
            dest: dest.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryConnection {
    dest: LocalityAddress,
    state: Arc<MemoryState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, payload: &[u8]) -> Result<(), BootError> {
        if self.state.fail_send.lock().unwrap().contains(&self.dest) {
            return UnreachableSnafu {
                dest: self.dest.to_string(),
                reason: "injected send failure".to_string(),
            }
            .fail();
        }

        self.state
            .sent
            .lock()
            .unwrap()
            .push((self.dest.clone(), payload.to_vec()));

        let inbox = self.state.inboxes.lock().unwrap().get(&self.dest).cloned();
        if let Some(inbox) = inbox {
            let _ = inbox.send(payload.to_vec());
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.live_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
