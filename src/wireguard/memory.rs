//! In-memory interface gateway
//!
//! Models one interface and its configuration file as a single map. Used by
//! tests; counters are set explicitly to simulate traffic and interface
//! restarts.

use crate::error::{Result, VpnmonError};
use crate::wireguard::gateway::lowest_free_host;
use crate::wireguard::{InterfaceGateway, KeyPair, LivePeer, PublicKey, RawSample};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MemoryPeer {
    allowed_ip: IpNet,
    received: u64,
    sent: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    peers: BTreeMap<PublicKey, MemoryPeer>,
    fail_config_writes: bool,
}

/// Gateway holding the interface state in memory
#[derive(Debug)]
pub struct MemoryGateway {
    subnet: IpNet,
    server: KeyPair,
    endpoint: String,
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    /// Create an empty interface serving `subnet`
    pub fn new(subnet: IpNet) -> Self {
        Self {
            subnet,
            server: KeyPair::generate(),
            endpoint: "vpn.example.test:51820".to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a peer on the interface directly, bypassing the ledger
    pub fn insert_peer(&self, public_key: PublicKey, allowed_ip: IpNet) {
        self.state().peers.insert(
            public_key,
            MemoryPeer {
                allowed_ip,
                received: 0,
                sent: 0,
            },
        );
    }

    /// Take a peer off the interface directly, bypassing the ledger
    pub fn drop_peer(&self, public_key: &PublicKey) -> bool {
        self.state().peers.remove(public_key).is_some()
    }

    /// Set a peer's raw counters
    pub fn set_counters(&self, public_key: &PublicKey, received: u64, sent: u64) -> Result<()> {
        let mut state = self.state();
        let peer = state
            .peers
            .get_mut(public_key)
            .ok_or_else(|| VpnmonError::NotFound(public_key.to_base64()))?;
        peer.received = received;
        peer.sent = sent;
        Ok(())
    }

    /// Zero every counter, as an interface restart does
    pub fn restart(&self) {
        for peer in self.state().peers.values_mut() {
            peer.received = 0;
            peer.sent = 0;
        }
    }

    /// Make subsequent `add_peer` calls fail as if the config file were read-only
    pub fn fail_config_writes(&self, fail: bool) {
        self.state().fail_config_writes = fail;
    }

    /// Whether a peer is on the interface
    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.state().peers.contains_key(public_key)
    }

    /// The allowed IP assigned to a peer
    pub fn address_of(&self, public_key: &PublicKey) -> Option<IpNet> {
        self.state().peers.get(public_key).map(|p| p.allowed_ip)
    }

    /// Number of peers on the interface
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }
}

#[async_trait]
impl InterfaceGateway for MemoryGateway {
    async fn list_peer_samples(&self) -> Result<Vec<LivePeer>> {
        let state = self.state();
        Ok(state
            .peers
            .iter()
            .map(|(key, peer)| LivePeer {
                sample: RawSample::new(key.clone(), peer.received, peer.sent),
                allowed_ips: vec![peer.allowed_ip],
            })
            .collect())
    }

    async fn add_peer(&self, public_key: &PublicKey, allowed_ip: &IpNet) -> Result<()> {
        let mut state = self.state();
        if state.peers.contains_key(public_key) {
            return Err(VpnmonError::DuplicateKey(public_key.to_base64()));
        }
        if state.fail_config_writes {
            return Err(VpnmonError::ConfigWrite(
                "configuration file is read-only".to_string(),
            ));
        }
        state.peers.insert(
            public_key.clone(),
            MemoryPeer {
                allowed_ip: *allowed_ip,
                received: 0,
                sent: 0,
            },
        );
        Ok(())
    }

    async fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        match self.state().peers.remove(public_key) {
            Some(_) => Ok(()),
            None => Err(VpnmonError::NotFound(format!(
                "Peer {} is not configured",
                public_key
            ))),
        }
    }

    async fn next_free_address_excluding(&self, reserved: &HashSet<IpAddr>) -> Result<IpNet> {
        let state = self.state();
        let mut used = reserved.clone();
        used.extend(state.peers.values().map(|p| p.allowed_ip.addr()));
        lowest_free_host(&self.subnet, &used)
    }

    async fn server_public_key(&self) -> Result<PublicKey> {
        Ok(self.server.public.clone())
    }

    async fn server_endpoint(&self) -> Result<String> {
        Ok(self.endpoint.clone())
    }
}
