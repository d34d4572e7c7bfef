//! Live peer observations
//!
//! Types produced by the interface gateway when it reads the running
//! interface. Nothing here is persisted directly.

use crate::wireguard::PublicKey;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::net::IpAddr;

/// One reading of a peer's raw traffic counters
///
/// Counters are monotonic while the interface stays up and restart from
/// zero whenever the interface is restarted or the peer is re-added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    /// Peer identity
    pub public_key: PublicKey,
    /// Raw bytes received from the peer
    pub received: u64,
    /// Raw bytes sent to the peer
    pub sent: u64,
    /// When the counters were read
    pub observed_at: DateTime<Utc>,
}

impl RawSample {
    /// Create a sample observed now
    pub fn new(public_key: PublicKey, received: u64, sent: u64) -> Self {
        Self {
            public_key,
            received,
            sent,
            observed_at: Utc::now(),
        }
    }
}

/// A peer currently configured on the live interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePeer {
    /// Counter sample taken with the peer listing
    pub sample: RawSample,
    /// Allowed IPs currently assigned to the peer
    pub allowed_ips: Vec<IpNet>,
}

impl LivePeer {
    /// Peer identity
    pub fn public_key(&self) -> &PublicKey {
        &self.sample.public_key
    }

    /// The address recorded for the peer: its first allowed IP
    pub fn address(&self) -> Option<IpNet> {
        self.allowed_ips.first().copied()
    }

    /// Host addresses covered by the peer's allowed IPs
    pub fn host_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.allowed_ips.iter().map(|net| net.addr())
    }
}

/// Build a single-host network (`/32` or `/128`) for an address
pub fn host_net(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::KeyPair;

    #[test]
    fn test_live_peer_address() {
        let key = KeyPair::generate().public;
        let peer = LivePeer {
            sample: RawSample::new(key.clone(), 10, 20),
            allowed_ips: vec!["10.0.1.5/32".parse().unwrap(), "fd00::5/128".parse().unwrap()],
        };

        assert_eq!(peer.public_key(), &key);
        assert_eq!(peer.address().unwrap().to_string(), "10.0.1.5/32");
        assert_eq!(peer.host_addresses().count(), 2);
    }

    #[test]
    fn test_live_peer_without_allowed_ips() {
        let peer = LivePeer {
            sample: RawSample::new(KeyPair::generate().public, 0, 0),
            allowed_ips: vec![],
        };
        assert!(peer.address().is_none());
    }

    #[test]
    fn test_host_net() {
        assert_eq!(host_net("10.0.1.2".parse().unwrap()).to_string(), "10.0.1.2/32");
        assert_eq!(host_net("fd00::2".parse().unwrap()).to_string(), "fd00::2/128");
    }
}
