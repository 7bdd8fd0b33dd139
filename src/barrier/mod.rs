//! The one-shot boot barrier.
//!
//! A [`BootBarrier`] is the synchronization gate a locality stands behind
//! while the distributed addressing fabric is still being built. It starts
//! `Closed` and transitions to `Open` exactly once, on [`BootBarrier::notify`].
//!
//! While closed, [`BootBarrier::apply`] defers parcels for every
//! destination except the pre-configured bootstrap address, which is
//! dialable by construction and carries the registration traffic itself.
//! Opening the barrier flushes the deferred queue before any waiter
//! resumes, so a thread released from [`BootBarrier::wait`] observes a
//! world where everything submitted before the flip is already in flight.
//!
//! The open flag and the queue share one exclusive guard; the guard is
//! never held across a transport send.

pub mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::BootError;
use crate::locality::LocalityAddress;
use crate::transport::cache::ConnectionCache;
use self::queue::{PendingActionQueue, QueuedParcel};

/// A unit of work addressed to a locality: an opaque payload plus its
/// destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parcel {
    /// Where the payload must be delivered.
    pub dest: LocalityAddress,
    /// Opaque payload bytes, already encoded for the wire.
    pub payload: Vec<u8>,
}

impl Parcel {
    /// Create a parcel.
    pub fn new(dest: LocalityAddress, payload: Vec<u8>) -> Self {
        Self { dest, payload }
    }
}

/// A deferred parcel whose delivery failed during the flush.
///
/// Reported on the barrier's failure channel so nothing vanishes silently;
/// the flush itself continues with the remaining entries.
#[derive(Debug)]
pub struct FailedParcel {
    /// Submission sequence number of the failed entry.
    pub seq: u64,
    /// The parcel that could not be delivered.
    pub parcel: Parcel,
    /// Why delivery failed.
    pub error: BootError,
}

struct BarrierState {
    open: bool,
    queue: PendingActionQueue,
}

/// One-shot distributed synchronization gate with an action-deferral queue.
pub struct BootBarrier {
    bootstrap: LocalityAddress,
    cache: Arc<ConnectionCache>,
    state: Mutex<BarrierState>,
    opened: watch::Sender<bool>,
    flushes: AtomicU64,
    failures: mpsc::UnboundedSender<FailedParcel>,
}

impl BootBarrier {
    /// Create a closed barrier.
    ///
    /// `bootstrap` is the rendezvous address that stays dialable while the
    /// barrier is closed. Flush failures are reported on `failures`.
    pub fn new(
        bootstrap: LocalityAddress,
        cache: Arc<ConnectionCache>,
        failures: mpsc::UnboundedSender<FailedParcel>,
    ) -> Self {
        let (opened, _) = watch::channel(false);
        Self {
            bootstrap,
            cache,
            state: Mutex::new(BarrierState {
                open: false,
                queue: PendingActionQueue::new(),
            }),
            opened,
            flushes: AtomicU64::new(0),
            failures,
        }
    }

    /// Submit a parcel for delivery.
    ///
    /// The bootstrap destination is always attempted immediately, even
    /// while closed. Any other destination is deferred while closed
    /// (non-blocking) and dispatched immediately once open. A failed
    /// immediate dispatch surfaces to the caller and is not retried here.
    pub async fn apply(&self, parcel: Parcel) -> Result<(), BootError> {
        if parcel.dest == self.bootstrap {
            debug!(dest = %parcel.dest, "dispatching to bootstrap address");
            return self.dispatch(&parcel).await;
        }

        {
            let mut state = self.state.lock().await;
            if !state.open {
                let seq = state.queue.push(parcel);
                debug!(seq, "barrier closed, parcel deferred");
                return Ok(());
            }
        }

        self.dispatch(&parcel).await
    }

    /// Suspend until the barrier opens. Returns immediately if it already
    /// has.
    ///
    /// Waiters resume only after the flip's flush has completed, so no
    /// parcel submitted before the flip is still pending when this
    /// returns.
    pub async fn wait(&self) {
        let mut opened = self.opened.subscribe();
        // The sender lives on self, so wait_for can only fail after the
        // barrier itself is gone.
        let _ = opened.wait_for(|open| *open).await;
    }

    /// [`Self::wait`] with an external deadline.
    ///
    /// Expiry means the runtime could not establish distributed
    /// addressing; the caller treats it as a fatal startup error.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), BootError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| BootError::BootstrapTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    /// Open the barrier, flush the deferred queue, then release waiters.
    ///
    /// Idempotent: only the first call flips the flag and flushes; later
    /// calls return without effect.
    pub async fn notify(&self) {
        let drained = {
            let mut state = self.state.lock().await;
            if state.open {
                debug!("barrier already open, notify ignored");
                return;
            }
            state.open = true;
            state.queue.drain()
        };

        self.flushes.fetch_add(1, Ordering::Relaxed);
        info!(deferred = drained.len(), "barrier opened, flushing deferred parcels");
        self.flush(drained).await;

        let _ = self.opened.send(true);
    }

    /// Whether the barrier has opened.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Number of deferred parcels currently queued.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// How many flushes have executed. At most 1 for the lifetime of the
    /// barrier.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// The pre-configured rendezvous address.
    pub fn bootstrap_address(&self) -> &LocalityAddress {
        &self.bootstrap
    }

    /// Replay drained entries: per destination strictly in submission
    /// order, destinations concurrently. Failed entries go to the failure
    /// channel; one failure never aborts the rest of the batch.
    async fn flush(&self, entries: Vec<QueuedParcel>) {
        if entries.is_empty() {
            return;
        }

        let groups = queue::group_by_destination(entries);
        let sends = groups.into_iter().map(|(dest, group)| async move {
            for entry in group {
                match self.dispatch(&entry.parcel).await {
                    Ok(()) => {}
                    Err(error) => {
                        warn!(
                            dest = %dest,
                            seq = entry.seq,
                            %error,
                            "deferred parcel failed during flush"
                        );
                        let _ = self.failures.send(FailedParcel {
                            seq: entry.seq,
                            parcel: entry.parcel,
                            error,
                        });
                    }
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Lease a connection, send, and return or discard the lease.
    async fn dispatch(&self, parcel: &Parcel) -> Result<(), BootError> {
        let mut handle = self.cache.acquire(&parcel.dest).await?;
        match handle.send(&parcel.payload).await {
            Ok(()) => {
                self.cache.release(handle).await;
                Ok(())
            }
            Err(err) => {
                self.cache.discard(handle);
                Err(err)
            }
        }
    }
}
