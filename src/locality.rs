//! Locality identity.
//!
//! A locality is one participating process of the distributed runtime. Its
//! address is fixed at process startup from configuration and never changes
//! afterwards; the generation counter distinguishes successive incarnations
//! bound to the same endpoint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BootError;

/// Identity of a locality reachable over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalityAddress {
    /// Hostname or IP the locality listens on.
    pub host: String,
    /// Listener port. Port 0 requests an OS-assigned port at bind time.
    pub port: u16,
    /// Incarnation counter for this endpoint.
    #[serde(default)]
    pub generation: u32,
}

impl LocalityAddress {
    /// Create an address with generation 0.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            generation: 0,
        }
    }

    /// Set the generation counter.
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    /// Replace the port, keeping host and generation.
    ///
    /// Used after binding a port-0 listener to advertise the real port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The `host:port` endpoint string the transport dials.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the endpoint can be dialed at all.
    pub fn is_routable(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

impl fmt::Display for LocalityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}@{}", self.host, self.port, self.generation)
        }
    }
}

impl FromStr for LocalityAddress {
    type Err = BootError;

    /// Parse `host:port` or `host:port@generation`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BootError::InvalidAddress {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (endpoint, generation) = match s.split_once('@') {
            Some((endpoint, generation)) => {
                let generation = generation
                    .parse::<u32>()
                    .map_err(|_| invalid("generation must be a u32"))?;
                (endpoint, generation)
            }
            None => (s, 0),
        };

        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("host must not be empty"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a u16"))?;

        Ok(Self {
            host: host.to_string(),
            port,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint() {
        let addr: LocalityAddress = "node-3.cluster:7910".parse().unwrap();
        assert_eq!(addr.host, "node-3.cluster");
        assert_eq!(addr.port, 7910);
        assert_eq!(addr.generation, 0);
        assert_eq!(addr.endpoint(), "node-3.cluster:7910");
    }

    #[test]
    fn parses_generation_suffix() {
        let addr: LocalityAddress = "10.0.0.5:7910@4".parse().unwrap();
        assert_eq!(addr.generation, 4);
        assert_eq!(addr.to_string(), "10.0.0.5:7910@4");
    }

    #[test]
    fn display_roundtrips() {
        for input in ["a:1", "host:7910@2"] {
            let addr: LocalityAddress = input.parse().unwrap();
            assert_eq!(addr.to_string(), input);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "no-port", ":7910", "h:not-a-port", "h:1@x"] {
            assert!(
                input.parse::<LocalityAddress>().is_err(),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn routability() {
        assert!(LocalityAddress::new("h", 1).is_routable());
        assert!(!LocalityAddress::new("h", 0).is_routable());
        assert!(!LocalityAddress::new("", 1).is_routable());
    }
}
