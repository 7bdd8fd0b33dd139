//! Bootstrap synchronization core for a distributed runtime.
//!
//! Before any general inter-locality communication is possible, the
//! localities of a cluster must agree on a shared addressing space. This
//! crate implements the rendezvous that establishes it:
//!
//! - [`barrier::BootBarrier`]: a one-shot `Closed -> Open` gate. Parcels
//!   submitted while closed are deferred; opening the gate flushes them in
//!   per-destination submission order.
//! - [`transport`]: the framed TCP parcelport, the capability traits it
//!   implements, and the bounded [`transport::cache::ConnectionCache`]
//!   leased around every send.
//! - [`protocol::BootstrapProtocol`]: the asymmetric root/joining roles.
//!   Joining localities register with the pre-configured root address (the
//!   only destination reachable before the gate opens) and block until the
//!   root acknowledges; the root opens its own gate once the expected
//!   quorum of registrations has arrived.
//! - [`boot::bootstrap`]: wires one bootstrap episode together and returns
//!   a handle with graceful shutdown.
//!
//! The barrier is purely in-memory and scoped to a single bootstrap
//! episode per process. Reconnection after a locality joins, bootstrap
//! traffic authentication, and discovery of the root address are out of
//! scope; the root address arrives via configuration.

pub mod barrier;
pub mod boot;
pub mod config;
pub mod constants;
pub mod error;
pub mod locality;
pub mod protocol;
pub mod testing;
pub mod transport;
pub mod wire;

pub use barrier::{BootBarrier, FailedParcel, Parcel};
pub use boot::{BootHandle, bootstrap};
pub use config::{BootConfig, RoleConfig};
pub use error::BootError;
pub use locality::LocalityAddress;
pub use protocol::BootstrapProtocol;
pub use wire::BootMessage;
