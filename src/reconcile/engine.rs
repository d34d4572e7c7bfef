//! Reconciliation and collection passes

use super::classify::{classify, Classification, Drift};
use super::policy::AuthorityPolicy;
use crate::error::{Result, VpnmonError};
use crate::ledger::{Ledger, Peer, YearMonth};
use crate::lifecycle::LifecycleLock;
use crate::wireguard::{InterfaceGateway, LivePeer, PublicKey};
use ipnet::IpNet;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Corrective action chosen for a drifted key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remedy {
    /// Register a live peer in the ledger without name or email
    ImportToLedger {
        /// Address taken from the live peer's allowed IPs
        address: Option<IpNet>,
    },
    /// Configure a ledger peer on the interface again
    AddToInterface {
        /// Address recorded in the ledger
        address: IpNet,
    },
    /// Drop the ledger row, keeping usage history
    RemoveFromLedger,
}

/// What happened to a remedy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    /// Report-only run; nothing was changed
    Planned,
    /// The remedy was carried out
    Applied,
    /// The remedy was attempted and failed
    Failed(String),
}

/// One drifted key, its remedy and the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    /// Drifted key
    pub public_key: PublicKey,
    /// Which side the key is missing from
    pub drift: Drift,
    /// Action chosen under the configured policy
    pub remedy: Remedy,
    /// Result of the action
    pub outcome: Outcome,
}

/// Why a drifted key cannot be fixed automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The key's address is already held by a different peer
    AddressCollision,
    /// A ledger peer must be re-added but has no recorded address
    MissingAddress,
}

/// Drift the policy cannot resolve; always reported, never fixed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Drifted key
    pub public_key: PublicKey,
    /// Which side the key is missing from
    pub drift: Drift,
    /// Reason
    pub kind: ConflictKind,
    /// Address involved, if any
    pub address: Option<IpNet>,
    /// The other peer holding the address, for collisions
    pub holder: Option<PublicKey>,
}

/// Result of a reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Policy in force
    pub policy: AuthorityPolicy,
    /// Whether remedies were applied
    pub auto_fix: bool,
    /// Partition of every observed key
    pub classification: Classification,
    /// Remedies for resolvable drift
    pub actions: Vec<SyncAction>,
    /// Drift left for an administrator
    pub conflicts: Vec<Conflict>,
}

impl SyncReport {
    /// Number of remedies carried out
    pub fn fixed_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.outcome == Outcome::Applied)
            .count()
    }

    /// Whether any remedy failed
    pub fn has_failures(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a.outcome, Outcome::Failed(_)))
    }

    /// Error describing the conflicts, if there are any
    pub fn conflict_error(&self) -> Option<VpnmonError> {
        if self.conflicts.is_empty() {
            return None;
        }
        let keys: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| c.public_key.to_base64())
            .collect();
        Some(VpnmonError::ReconciliationConflict(format!(
            "{} unresolved: {}",
            self.conflicts.len(),
            keys.join(", ")
        )))
    }
}

/// A peer that could not be recorded during collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionFailure {
    /// Peer whose sample was lost
    pub public_key: PublicKey,
    /// Error text
    pub error: String,
}

/// Result of a collection pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    /// Month the samples were recorded under
    pub month: YearMonth,
    /// Samples recorded
    pub recorded: usize,
    /// Live peers skipped because the ledger does not know them
    pub skipped_unregistered: usize,
    /// Samples that failed to persist
    pub failures: Vec<CollectionFailure>,
}

impl CollectionReport {
    /// Whether every sample of a registered peer was stored
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compares the live interface with the ledger and repairs drift
pub struct Reconciler {
    gateway: Arc<dyn InterfaceGateway>,
    ledger: Ledger,
    lock: Arc<LifecycleLock>,
    policy: AuthorityPolicy,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        gateway: Arc<dyn InterfaceGateway>,
        ledger: Ledger,
        lock: Arc<LifecycleLock>,
        policy: AuthorityPolicy,
    ) -> Self {
        Self {
            gateway,
            ledger,
            lock,
            policy,
        }
    }

    /// Policy used for ledger-only peers
    pub fn policy(&self) -> AuthorityPolicy {
        self.policy
    }

    /// Classify drift and, with `auto_fix`, apply the policy's remedies
    ///
    /// Fixing runs hold the lifecycle lock for the whole pass.
    pub async fn run(&self, auto_fix: bool) -> Result<SyncReport> {
        let _guard = if auto_fix {
            Some(self.lock.acquire().await?)
        } else {
            None
        };

        let live = self.gateway.list_peer_samples().await?;
        let registered = self.ledger.list_peers().await?;

        let classification = classify(
            live.iter().map(|p| p.public_key()),
            registered.iter().map(|p| &p.public_key),
        );
        info!(
            "Sync: {} live only, {} ledger only, {} consistent",
            classification.live_only.len(),
            classification.ledger_only.len(),
            classification.consistent.len()
        );

        let (planned, conflicts) = self.plan(&classification, &live, &registered);
        for conflict in &conflicts {
            warn!(
                "Conflict for {}: {:?} (address {:?}, held by {:?})",
                conflict.public_key, conflict.kind, conflict.address, conflict.holder
            );
        }

        let mut actions = Vec::with_capacity(planned.len());
        for (public_key, drift, remedy) in planned {
            let outcome = if auto_fix {
                match self.apply(&public_key, &remedy).await {
                    Ok(()) => {
                        info!("Fixed {}: {:?}", public_key, remedy);
                        Outcome::Applied
                    }
                    Err(e) => {
                        error!("Failed to fix {}: {}", public_key, e);
                        Outcome::Failed(e.to_string())
                    }
                }
            } else {
                Outcome::Planned
            };
            actions.push(SyncAction {
                public_key,
                drift,
                remedy,
                outcome,
            });
        }

        Ok(SyncReport {
            policy: self.policy,
            auto_fix,
            classification,
            actions,
            conflicts,
        })
    }

    fn plan(
        &self,
        classification: &Classification,
        live: &[LivePeer],
        registered: &[Peer],
    ) -> (Vec<(PublicKey, Drift, Remedy)>, Vec<Conflict>) {
        let ledger_holders: HashMap<IpAddr, &PublicKey> = registered
            .iter()
            .filter_map(|p| p.address.map(|a| (a.addr(), &p.public_key)))
            .collect();
        let live_holders: HashMap<IpAddr, &PublicKey> = live
            .iter()
            .flat_map(|p| p.host_addresses().map(move |a| (a, p.public_key())))
            .collect();
        let live_by_key: BTreeMap<&PublicKey, &LivePeer> =
            live.iter().map(|p| (p.public_key(), p)).collect();
        let ledger_by_key: BTreeMap<&PublicKey, &Peer> =
            registered.iter().map(|p| (&p.public_key, p)).collect();

        let mut planned = Vec::new();
        let mut conflicts = Vec::new();

        for key in &classification.live_only {
            let address = live_by_key.get(key).and_then(|p| p.address());
            let holder = address
                .and_then(|a| ledger_holders.get(&a.addr()))
                .filter(|holder| **holder != key);

            match holder {
                Some(holder) => conflicts.push(Conflict {
                    public_key: key.clone(),
                    drift: Drift::LiveOnly,
                    kind: ConflictKind::AddressCollision,
                    address,
                    holder: Some((*holder).clone()),
                }),
                None => planned.push((key.clone(), Drift::LiveOnly, Remedy::ImportToLedger { address })),
            }
        }

        for key in &classification.ledger_only {
            if self.policy == AuthorityPolicy::Interface {
                planned.push((key.clone(), Drift::LedgerOnly, Remedy::RemoveFromLedger));
                continue;
            }

            let address = ledger_by_key.get(key).and_then(|p| p.address);
            let Some(address) = address else {
                conflicts.push(Conflict {
                    public_key: key.clone(),
                    drift: Drift::LedgerOnly,
                    kind: ConflictKind::MissingAddress,
                    address: None,
                    holder: None,
                });
                continue;
            };

            match live_holders.get(&address.addr()) {
                Some(holder) => conflicts.push(Conflict {
                    public_key: key.clone(),
                    drift: Drift::LedgerOnly,
                    kind: ConflictKind::AddressCollision,
                    address: Some(address),
                    holder: Some((*holder).clone()),
                }),
                None => planned.push((key.clone(), Drift::LedgerOnly, Remedy::AddToInterface { address })),
            }
        }

        (planned, conflicts)
    }

    async fn apply(&self, public_key: &PublicKey, remedy: &Remedy) -> Result<()> {
        match remedy {
            Remedy::ImportToLedger { address } => {
                self.ledger
                    .upsert_peer(public_key, *address, None, None)
                    .await?;
            }
            Remedy::AddToInterface { address } => {
                self.gateway.add_peer(public_key, address).await?;
            }
            Remedy::RemoveFromLedger => {
                self.ledger.delete_peer(public_key, true).await?;
            }
        }
        Ok(())
    }

    /// Record one sample for every live peer the ledger knows
    ///
    /// Unregistered live peers are skipped, including peers deleted after
    /// the ledger was listed. A failed write is reported per peer; the rest
    /// of the pass continues.
    pub async fn collect(&self, month: YearMonth) -> Result<CollectionReport> {
        let live = self.gateway.list_peer_samples().await?;
        let registered = self.ledger.list_peers().await?;
        let classification = classify(
            live.iter().map(|p| p.public_key()),
            registered.iter().map(|p| &p.public_key),
        );

        let mut report = CollectionReport {
            month,
            recorded: 0,
            skipped_unregistered: 0,
            failures: Vec::new(),
        };

        for peer in &live {
            if !classification.consistent.contains(peer.public_key()) {
                debug!("Skipping unregistered peer {}", peer.public_key());
                report.skipped_unregistered += 1;
                continue;
            }

            match self.ledger.record_sample(&peer.sample, month).await {
                Ok(_) => report.recorded += 1,
                Err(VpnmonError::NotFound(_)) => {
                    debug!("Peer {} was deleted during collection", peer.public_key());
                    report.skipped_unregistered += 1;
                }
                Err(e) => {
                    error!("Failed to record sample for {}: {}", peer.public_key(), e);
                    report.failures.push(CollectionFailure {
                        public_key: peer.public_key().clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Collected {} samples for {} ({} unregistered, {} failed)",
            report.recorded,
            month,
            report.skipped_unregistered,
            report.failures.len()
        );
        Ok(report)
    }
}
