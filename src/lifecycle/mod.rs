//! Peer lifecycle
//!
//! Creation, deletion and metadata updates. Creation and deletion run
//! under the lifecycle lock; creation is all-or-nothing: a peer is either
//! live and registered with a fresh address, or neither.

pub mod client_config;
mod lock;

pub use client_config::ClientProfile;
pub use lock::{LifecycleGuard, LifecycleLock};

use crate::config::ClientConfig;
use crate::error::{Result, VpnmonError};
use crate::ledger::{Ledger, Peer};
use crate::security::{validate_email, validate_peer_name};
use crate::wireguard::{InterfaceGateway, KeyPair, PublicKey};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Attempts at drawing a key not already in use
const KEY_ATTEMPTS: usize = 3;

/// A newly created peer
#[derive(Debug, Clone)]
pub struct CreatedPeer {
    /// Ledger record
    pub peer: Peer,
    /// Client connection details, including the private key
    pub profile: ClientProfile,
    /// Rendered client configuration
    pub client_config: String,
}

/// Result of a deletion request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Peers removed from both the interface and the ledger
    pub removed: Vec<PublicKey>,
    /// Peers that could not be removed, with the reason
    pub failed: Vec<(PublicKey, String)>,
}

impl DeletionReport {
    /// Whether every matched peer was removed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates, deletes and updates peers
pub struct PeerManager {
    gateway: Arc<dyn InterfaceGateway>,
    ledger: Ledger,
    lock: Arc<LifecycleLock>,
    client: ClientConfig,
}

impl PeerManager {
    /// Create a peer manager
    pub fn new(
        gateway: Arc<dyn InterfaceGateway>,
        ledger: Ledger,
        lock: Arc<LifecycleLock>,
        client: ClientConfig,
    ) -> Self {
        Self {
            gateway,
            ledger,
            lock,
            client,
        }
    }

    /// Mint a key pair, allocate an address, configure the interface and
    /// register the peer
    ///
    /// Key generation, allocation, the interface write and the ledger write
    /// form one critical section. A ledger failure removes the peer from
    /// the interface again before the error is returned.
    pub async fn create_peer(&self, name: &str, email: &str) -> Result<CreatedPeer> {
        validate_peer_name(name)?;
        validate_email(email)?;

        // Introspection first, so a missing endpoint fails before any change
        let server_public_key = self.gateway.server_public_key().await?;
        let endpoint = self.gateway.server_endpoint().await?;

        let _guard = self.lock.acquire().await?;

        let key_pair = self.fresh_key_pair().await?;
        let reserved = self.ledger.assigned_addresses().await?;
        let address = self.gateway.next_free_address_excluding(&reserved).await?;
        info!("Allocated {} for new peer {}", address, key_pair.public);

        self.gateway.add_peer(&key_pair.public, &address).await?;

        let peer = match self
            .ledger
            .upsert_peer(&key_pair.public, Some(address), Some(name), Some(email))
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                error!("Ledger write failed for {}, rolling back: {}", key_pair.public, e);
                if let Err(rollback) = self.gateway.remove_peer(&key_pair.public).await {
                    error!("Rollback of {} failed: {}", key_pair.public, rollback);
                }
                return Err(e);
            }
        };

        let profile = ClientProfile {
            private_key: key_pair.private,
            address,
            server_public_key,
            endpoint,
        };
        let client_config = profile.render(&self.client);

        info!("Created peer {} ({}) at {}", name, peer.public_key, address);
        Ok(CreatedPeer {
            peer,
            profile,
            client_config,
        })
    }

    async fn fresh_key_pair(&self) -> Result<KeyPair> {
        let live = self.gateway.list_peer_samples().await?;

        for _ in 0..KEY_ATTEMPTS {
            let candidate = self.gateway.generate_key_pair();
            let on_interface = live.iter().any(|p| p.public_key() == &candidate.public);
            let in_ledger = self.ledger.get_peer(&candidate.public).await?.is_some();
            if !on_interface && !in_ledger {
                return Ok(candidate);
            }
            warn!("Generated key {} is already in use, retrying", candidate.public);
        }

        Err(VpnmonError::DuplicateKey(
            "could not generate an unused key pair".to_string(),
        ))
    }

    /// Save a created peer's client configuration under the configured
    /// output directory; `None` when no directory is configured
    pub async fn save_client_config(&self, created: &CreatedPeer) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.client.output_dir else {
            return Ok(None);
        };
        let name = created.peer.name.as_deref().unwrap_or("peer");
        client_config::save(dir, name, &created.client_config)
            .await
            .map(Some)
    }

    /// Delete every peer registered with `email`
    pub async fn delete_by_email(&self, email: &str, keep_history: bool) -> Result<DeletionReport> {
        let _guard = self.lock.acquire().await?;

        let peers = self.ledger.find_peers_by_email(email).await?;
        if peers.is_empty() {
            return Err(VpnmonError::NotFound(format!(
                "No peers registered with email {}",
                email
            )));
        }

        info!("Deleting {} peer(s) for {}", peers.len(), email);
        let mut report = DeletionReport::default();
        for peer in peers {
            match self.remove(&peer.public_key, keep_history, true).await {
                Ok(()) => report.removed.push(peer.public_key),
                Err(e) => {
                    error!("Failed to delete {}: {}", peer.public_key, e);
                    report.failed.push((peer.public_key, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Delete one peer by public key
    pub async fn delete_by_key(
        &self,
        public_key: &PublicKey,
        keep_history: bool,
    ) -> Result<DeletionReport> {
        let _guard = self.lock.acquire().await?;

        let registered = self.ledger.get_peer(public_key).await?.is_some();
        self.remove(public_key, keep_history, registered).await?;

        Ok(DeletionReport {
            removed: vec![public_key.clone()],
            failed: Vec::new(),
        })
    }

    /// Remove from the interface, then from the ledger
    ///
    /// A peer already absent from the interface is fine when it is
    /// registered. The ledger row is kept if the interface removal fails,
    /// so a live peer is never left unrecorded.
    async fn remove(&self, public_key: &PublicKey, keep_history: bool, registered: bool) -> Result<()> {
        match self.gateway.remove_peer(public_key).await {
            Ok(()) => {}
            Err(VpnmonError::NotFound(_)) if registered => {
                warn!("Peer {} was not on the interface", public_key);
            }
            Err(e) => return Err(e),
        }

        self.ledger.delete_peer(public_key, keep_history).await?;
        Ok(())
    }

    /// Change a peer's name and/or email; the interface is not touched
    pub async fn update_peer(
        &self,
        public_key: &PublicKey,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Peer> {
        if name.is_none() && email.is_none() {
            return Err(VpnmonError::Validation(
                "Nothing to update: give a name and/or an email".to_string(),
            ));
        }
        if let Some(name) = name {
            validate_peer_name(name)?;
        }
        if let Some(email) = email {
            validate_email(email)?;
        }

        self.ledger.update_peer_info(public_key, name, email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::YearMonth;
    use crate::wireguard::{MemoryGateway, MockInterfaceGateway, RawSample};
    use ipnet::IpNet;
    use std::collections::HashSet;

    async fn ledger() -> Ledger {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger.setup().await.unwrap();
        ledger
    }

    fn manager(gateway: Arc<dyn InterfaceGateway>, ledger: Ledger) -> PeerManager {
        let client = ClientConfig {
            output_dir: None,
            ..ClientConfig::default()
        };
        PeerManager::new(gateway, ledger, Arc::new(LifecycleLock::in_process()), client)
    }

    #[tokio::test]
    async fn test_create_peer() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        let manager = manager(gateway.clone(), ledger.clone());

        let created = manager.create_peer("Alice", "a@b.com").await.unwrap();
        let key = &created.peer.public_key;

        assert_eq!(created.peer.address, Some("10.0.1.2/32".parse().unwrap()));
        assert_eq!(gateway.address_of(key), created.peer.address);
        assert_eq!(ledger.get_peer(key).await.unwrap().unwrap(), created.peer);
        assert_eq!(&created.profile.private_key.public_key(), key);
        assert!(created.client_config.contains("Address = 10.0.1.2/32"));
        assert!(manager.save_client_config(&created).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input_without_changes() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let manager = manager(gateway.clone(), ledger().await);

        assert!(matches!(
            manager.create_peer("Alice", "not-an-email").await,
            Err(VpnmonError::Validation(_))
        ));
        assert!(matches!(
            manager.create_peer("", "a@b.com").await,
            Err(VpnmonError::Validation(_))
        ));
        assert_eq!(gateway.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_allocation_skips_ledger_addresses() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        // Registered but currently off the interface
        ledger
            .upsert_peer(&KeyPair::generate().public, Some("10.0.1.2/32".parse().unwrap()), None, None)
            .await
            .unwrap();

        let created = manager(gateway, ledger).create_peer("Bob", "b@c.com").await.unwrap();
        assert_eq!(created.peer.address, Some("10.0.1.3/32".parse().unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_distinct_addresses() {
        // /29 leaves five client addresses after the server
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/29".parse().unwrap()));
        let manager = Arc::new(manager(gateway.clone(), ledger().await));

        let mut handles = Vec::new();
        for i in 0..5 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.create_peer(&format!("peer{}", i), "team@example.com").await
            }));
        }

        let mut addresses = HashSet::new();
        for handle in handles {
            let created = handle.await.unwrap().unwrap();
            addresses.insert(created.peer.address.unwrap());
        }
        assert_eq!(addresses.len(), 5);
        assert_eq!(gateway.peer_count(), 5);

        let overflow = manager.create_peer("peer5", "team@example.com").await;
        assert!(matches!(overflow, Err(VpnmonError::SubnetExhausted(_))));
        assert_eq!(gateway.peer_count(), 5);
    }

    #[tokio::test]
    async fn test_config_write_failure_leaves_nothing() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        gateway.fail_config_writes(true);
        let ledger = ledger().await;
        let manager = manager(gateway.clone(), ledger.clone());

        let err = manager.create_peer("Alice", "a@b.com").await.unwrap_err();
        assert!(matches!(err, VpnmonError::ConfigWrite(_)));
        assert_eq!(gateway.peer_count(), 0);
        assert!(ledger.list_peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_failure_rolls_back_interface() {
        let ledger = ledger().await;
        let taken: IpNet = "10.0.1.2/32".parse().unwrap();
        ledger
            .upsert_peer(&KeyPair::generate().public, Some(taken), None, None)
            .await
            .unwrap();

        let mut gateway = MockInterfaceGateway::new();
        gateway
            .expect_server_public_key()
            .returning(|| Ok(KeyPair::generate().public));
        gateway
            .expect_server_endpoint()
            .returning(|| Ok("vpn.example.test:51820".to_string()));
        gateway.expect_list_peer_samples().returning(|| Ok(Vec::new()));
        gateway.expect_generate_key_pair().returning(KeyPair::generate);
        // Hands out an address the ledger already holds
        gateway
            .expect_next_free_address_excluding()
            .returning(move |_| Ok(taken));
        gateway.expect_add_peer().times(1).returning(|_, _| Ok(()));
        gateway.expect_remove_peer().times(1).returning(|_| Ok(()));

        let manager = manager(Arc::new(gateway), ledger.clone());
        let err = manager.create_peer("Alice", "a@b.com").await.unwrap_err();
        assert!(matches!(err, VpnmonError::ConstraintViolation(_)));
        assert_eq!(ledger.list_peers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_email_keeps_history() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        let manager = manager(gateway.clone(), ledger.clone());

        let first = manager.create_peer("Phone", "a@b.com").await.unwrap();
        let second = manager.create_peer("Laptop", "a@b.com").await.unwrap();
        let other = manager.create_peer("Other", "c@d.com").await.unwrap();

        let month = YearMonth::current();
        ledger
            .record_sample(&RawSample::new(first.peer.public_key.clone(), 1, 1), month)
            .await
            .unwrap();

        let report = manager.delete_by_email("a@b.com", true).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.removed.len(), 2);

        assert!(!gateway.contains(&first.peer.public_key));
        assert!(!gateway.contains(&second.peer.public_key));
        assert!(gateway.contains(&other.peer.public_key));
        assert_eq!(
            ledger.query_usage(Some(&first.peer.public_key), None, true).await.unwrap().len(),
            1
        );

        assert!(matches!(
            manager.delete_by_email("a@b.com", true).await,
            Err(VpnmonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_by_key() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        let manager = manager(gateway.clone(), ledger.clone());

        let created = manager.create_peer("Alice", "a@b.com").await.unwrap();
        let key = created.peer.public_key.clone();
        ledger.record_sample(&RawSample::new(key.clone(), 1, 1), YearMonth::current()).await.unwrap();

        manager.delete_by_key(&key, false).await.unwrap();
        assert!(!gateway.contains(&key));
        assert!(ledger.get_peer(&key).await.unwrap().is_none());
        assert!(ledger.query_usage(Some(&key), None, true).await.unwrap().is_empty());

        assert!(matches!(
            manager.delete_by_key(&key, false).await,
            Err(VpnmonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_registered_peer_missing_from_interface() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        let key = KeyPair::generate().public;
        ledger.upsert_peer(&key, None, None, Some("a@b.com")).await.unwrap();

        let report = manager(gateway, ledger.clone()).delete_by_email("a@b.com", false).await.unwrap();
        assert_eq!(report.removed, vec![key.clone()]);
        assert!(ledger.get_peer(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_peer() {
        let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
        let ledger = ledger().await;
        let manager = manager(gateway.clone(), ledger.clone());
        let created = manager.create_peer("Alice", "a@b.com").await.unwrap();
        let key = created.peer.public_key;

        let updated = manager.update_peer(&key, None, Some("new@b.com")).await.unwrap();
        assert_eq!(updated.email.as_deref(), Some("new@b.com"));
        assert_eq!(updated.name.as_deref(), Some("Alice"));
        assert_eq!(gateway.address_of(&key), updated.address);

        assert!(manager.update_peer(&key, None, None).await.is_err());
        assert!(manager.update_peer(&key, None, Some("bad")).await.is_err());
        assert!(matches!(
            manager.update_peer(&KeyPair::generate().public, Some("x"), None).await,
            Err(VpnmonError::NotFound(_))
        ));
    }
}
