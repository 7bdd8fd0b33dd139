//! Layered configuration for one bootstrap episode.
//!
//! Configuration is loaded in layers with the following precedence
//! (lowest to highest):
//! 1. Built-in defaults
//! 2. Environment variables (`TAPROOT_*`)
//! 3. Explicit overrides (typically CLI arguments)
//!
//! The merged result is validated before the runtime wires anything up.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BOOT_TIMEOUT, MAX_LOCALITIES};
use crate::error::BootError;
use crate::locality::LocalityAddress;
use crate::transport::TcpTransportConfig;
use crate::transport::cache::ConnectionCacheConfig;

/// Runtime role of this locality, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoleConfig {
    /// The pre-configured rendezvous locality every peer registers with.
    Root {
        /// Registrations required before the root opens its barrier.
        /// 0 means open-ended: the barrier is opened at startup and every
        /// registration is acknowledged immediately.
        expected_peers: u32,
    },
    /// A locality joining the address space through the root.
    Joining,
}

impl FromStr for RoleConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" => Ok(RoleConfig::Root { expected_peers: 0 }),
            "joining" => Ok(RoleConfig::Joining),
            _ => Err(format!("invalid role '{s}', expected 'root' or 'joining'")),
        }
    }
}

/// Configuration for the bootstrap core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    /// Address this locality binds its parcel listener on and advertises
    /// in registrations. Port 0 requests an OS-assigned port.
    pub local: LocalityAddress,

    /// Address of the root locality. Externally configured, never
    /// discovered.
    pub bootstrap: LocalityAddress,

    /// Role of this locality.
    pub role: RoleConfig,

    /// External deadline on waiting for the barrier to open, in
    /// milliseconds. Expiry is a fatal bootstrap error.
    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,

    /// Connection cache bounds.
    #[serde(default)]
    pub cache: ConnectionCacheConfig,

    /// TCP parcelport tunables.
    #[serde(default)]
    pub transport: TcpTransportConfig,
}

fn default_boot_timeout_ms() -> u64 {
    DEFAULT_BOOT_TIMEOUT.as_millis() as u64
}

fn default_local() -> LocalityAddress {
    LocalityAddress::new("127.0.0.1", 0)
}

fn default_bootstrap() -> LocalityAddress {
    LocalityAddress::new("127.0.0.1", 7910)
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            local: default_local(),
            bootstrap: default_bootstrap(),
            role: RoleConfig::Joining,
            boot_timeout_ms: default_boot_timeout_ms(),
            cache: ConnectionCacheConfig::default(),
            transport: TcpTransportConfig::default(),
        }
    }
}

impl BootConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `TAPROOT_<FIELD>` (uppercase); unset
    /// or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let role = match parse_env::<RoleConfig>("TAPROOT_ROLE") {
            Some(RoleConfig::Root { .. }) => RoleConfig::Root {
                expected_peers: parse_env("TAPROOT_EXPECTED_PEERS").unwrap_or(0),
            },
            Some(RoleConfig::Joining) => RoleConfig::Joining,
            None => defaults.role,
        };

        Self {
            local: parse_env("TAPROOT_LOCAL").unwrap_or(defaults.local),
            bootstrap: parse_env("TAPROOT_BOOTSTRAP").unwrap_or(defaults.bootstrap),
            role,
            boot_timeout_ms: parse_env("TAPROOT_BOOT_TIMEOUT_MS")
                .unwrap_or(defaults.boot_timeout_ms),
            cache: ConnectionCacheConfig {
                capacity: parse_env("TAPROOT_CACHE_CAPACITY").unwrap_or(defaults.cache.capacity),
                acquire_timeout_ms: parse_env("TAPROOT_CACHE_ACQUIRE_TIMEOUT_MS")
                    .unwrap_or(defaults.cache.acquire_timeout_ms),
                idle_per_destination: parse_env("TAPROOT_CACHE_IDLE_PER_DESTINATION")
                    .unwrap_or(defaults.cache.idle_per_destination),
            },
            transport: TcpTransportConfig {
                connect_timeout_ms: parse_env("TAPROOT_CONNECT_TIMEOUT_MS")
                    .unwrap_or(defaults.transport.connect_timeout_ms),
                max_connect_retries: parse_env("TAPROOT_MAX_CONNECT_RETRIES")
                    .unwrap_or(defaults.transport.max_connect_retries),
                connect_backoff_base_ms: parse_env("TAPROOT_CONNECT_BACKOFF_BASE_MS")
                    .unwrap_or(defaults.transport.connect_backoff_base_ms),
                max_parcel_size: parse_env("TAPROOT_MAX_PARCEL_SIZE")
                    .unwrap_or(defaults.transport.max_parcel_size),
            },
        }
    }

    /// Merge configuration from another source.
    ///
    /// Fields in `other` that differ from the defaults override fields in
    /// `self`; this implements the layered precedence.
    pub fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.local != defaults.local {
            self.local = other.local;
        }
        if other.bootstrap != defaults.bootstrap {
            self.bootstrap = other.bootstrap;
        }
        if other.role != defaults.role {
            self.role = other.role;
        }
        if other.boot_timeout_ms != defaults.boot_timeout_ms {
            self.boot_timeout_ms = other.boot_timeout_ms;
        }
        if other.cache != defaults.cache {
            self.cache = other.cache;
        }
        if other.transport != defaults.transport {
            self.transport = other.transport;
        }
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), BootError> {
        let invalid = |reason: &str| BootError::InvalidConfig {
            reason: reason.to_string(),
        };

        if self.local.host.is_empty() {
            return Err(invalid("local host must not be empty"));
        }
        if !self.bootstrap.is_routable() {
            return Err(invalid("bootstrap address must be routable (host and port set)"));
        }
        if self.boot_timeout_ms == 0 {
            return Err(invalid("boot_timeout_ms must be non-zero"));
        }
        if self.cache.capacity == 0 {
            return Err(invalid("cache capacity must be non-zero"));
        }
        if self.transport.max_connect_retries == 0 {
            return Err(invalid("max_connect_retries must be non-zero"));
        }
        if let RoleConfig::Root { expected_peers } = self.role {
            if expected_peers > MAX_LOCALITIES {
                return Err(invalid("expected_peers exceeds the locality bound"));
            }
        }
        Ok(())
    }

    /// The wait deadline as a `Duration`.
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_for_joining() {
        BootConfig::default().validate().unwrap();
    }

    #[test]
    fn merge_prefers_non_default_fields() {
        let mut base = BootConfig::default();
        base.boot_timeout_ms = 5_000;

        let mut overrides = BootConfig::default();
        overrides.role = RoleConfig::Root { expected_peers: 2 };
        overrides.bootstrap = LocalityAddress::new("10.0.0.1", 7910);

        base.merge(overrides);
        assert_eq!(base.role, RoleConfig::Root { expected_peers: 2 });
        assert_eq!(base.bootstrap, LocalityAddress::new("10.0.0.1", 7910));
        // Untouched override fields keep the earlier layer's value.
        assert_eq!(base.boot_timeout_ms, 5_000);
    }

    #[test]
    fn rejects_unroutable_bootstrap() {
        let mut config = BootConfig::default();
        config.bootstrap = LocalityAddress::new("root", 0);
        assert!(matches!(
            config.validate().unwrap_err(),
            BootError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn rejects_zero_deadline_and_zero_capacity() {
        let mut config = BootConfig::default();
        config.boot_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BootConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_quorum() {
        let mut config = BootConfig::default();
        config.role = RoleConfig::Root {
            expected_peers: MAX_LOCALITIES + 1,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn role_parses_from_str() {
        assert_eq!(
            "root".parse::<RoleConfig>().unwrap(),
            RoleConfig::Root { expected_peers: 0 }
        );
        assert_eq!("JOINING".parse::<RoleConfig>().unwrap(), RoleConfig::Joining);
        assert!("console".parse::<RoleConfig>().is_err());
    }
}
