//! Fixed limits and default timeouts for the bootstrap core.

use std::time::Duration;

/// Maximum encoded parcel size accepted on the wire (1 MiB).
///
/// Bootstrap traffic is registration metadata; anything larger indicates a
/// corrupt frame or a misbehaving peer.
pub const MAX_PARCEL_SIZE: usize = 1024 * 1024;

/// Maximum number of localities a root will register in one episode.
pub const MAX_LOCALITIES: u32 = 1024;

/// Timeout for a single TCP connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum connect attempts before a destination is reported unreachable.
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Base backoff between connect retries (doubles per attempt: 100/200/400ms).
pub const CONNECT_RETRY_BACKOFF_BASE_MS: u64 = 100;

/// Default bound on concurrently leased connections in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Default bounded wait for a cache lease before reporting exhaustion.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of idle connections retained per destination.
pub const DEFAULT_IDLE_PER_DESTINATION: usize = 4;

/// Default external deadline on waiting for the barrier to open.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of the inbound parcel channel between listener and protocol.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_ordering() {
        // The boot deadline must outlast a full connect retry cycle, or a
        // joiner whose root is slow to bind times out before its last dial.
        let worst_case_dial = CONNECT_TIMEOUT * MAX_CONNECT_RETRIES
            + Duration::from_millis(CONNECT_RETRY_BACKOFF_BASE_MS * 7);
        assert!(DEFAULT_BOOT_TIMEOUT > worst_case_dial);
        assert!(DEFAULT_ACQUIRE_TIMEOUT >= CONNECT_TIMEOUT);
    }

    #[test]
    fn bounds_are_sane() {
        let max = MAX_LOCALITIES;
        assert!(max >= 2);
        assert!(max <= 65_536);
        assert!(MAX_PARCEL_SIZE >= 4096);
    }
}
