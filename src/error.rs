//! Error types for the bootstrap core.

use snafu::Snafu;

/// Errors surfaced by the barrier, cache, transport and protocol layers.
///
/// A failure local to one parcel never aborts the barrier's flush of the
/// remaining queue; failures that prevent the barrier from ever opening
/// are only observable as [`BootError::BootstrapTimeout`] around `wait`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BootError {
    /// A send failed at the transport layer. Not retried internally.
    #[snafu(display("destination {dest} unreachable: {reason}"))]
    Unreachable {
        /// Destination that could not be reached.
        dest: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// The connection cache could not grant a lease within its bound.
    #[snafu(display("connection cache exhausted acquiring {dest} (capacity {capacity})"))]
    ConnectionExhausted {
        /// Destination the lease was requested for.
        dest: String,
        /// Configured cache capacity.
        capacity: usize,
    },

    /// The external deadline expired before the barrier opened.
    ///
    /// Fatal to runtime startup; the process could not establish
    /// distributed addressing.
    #[snafu(display("bootstrap did not complete within {timeout_ms}ms"))]
    BootstrapTimeout {
        /// The deadline that expired.
        timeout_ms: u64,
    },

    /// A registration or acknowledgment carried malformed or inconsistent
    /// metadata. Rejected entries do not advance the registered count.
    #[snafu(display("protocol violation from {sender}: {reason}"))]
    ProtocolViolation {
        /// Claimed sender of the offending message.
        sender: String,
        /// What was inconsistent.
        reason: String,
    },

    /// A frame length prefix exceeded the configured maximum.
    #[snafu(display("frame too large: {size} bytes (max {max})"))]
    FrameTooLarge {
        /// Declared or actual frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload serialization failed.
    #[snafu(display("failed to encode bootstrap message: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Payload deserialization failed.
    #[snafu(display("failed to decode bootstrap message: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// An I/O failure on a transport stream.
    #[snafu(display("i/o failure during {context}: {source}"))]
    Io {
        /// What was being done when the failure occurred.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A locality address string could not be parsed.
    #[snafu(display("invalid locality address '{input}': {reason}"))]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration failed validation.
    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig {
        /// Which constraint was violated.
        reason: String,
    },
}

impl BootError {
    /// Whether this error indicates the peer could not be reached at all,
    /// as opposed to a local resource or protocol problem.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BootError::Unreachable { .. })
    }
}
