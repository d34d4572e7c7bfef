//! Integration tests for vpnmon
//!
//! These tests drive the lifecycle, collection and reconciliation paths
//! together against an in-memory interface and an on-disk ledger.

use std::sync::Arc;
use tempfile::TempDir;
use vpnmon::config::ClientConfig;
use vpnmon::ledger::{Ledger, YearMonth};
use vpnmon::lifecycle::{LifecycleLock, PeerManager};
use vpnmon::reconcile::{AuthorityPolicy, Outcome, Reconciler, Remedy};
use vpnmon::report;
use vpnmon::wireguard::{InterfaceGateway, KeyPair, MemoryGateway, PublicKey};
use vpnmon::VpnmonError;

struct Harness {
    _dir: TempDir,
    gateway: Arc<MemoryGateway>,
    ledger: Ledger,
    manager: PeerManager,
    reconciler: Reconciler,
}

async fn harness(policy: AuthorityPolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(&dir.path().join("data").join("usage.db"))
        .await
        .unwrap();
    ledger.setup().await.unwrap();

    let gateway = Arc::new(MemoryGateway::new("10.0.1.0/24".parse().unwrap()));
    let lock = Arc::new(LifecycleLock::new(dir.path().join("vpnmon.lock")));
    let client = ClientConfig {
        output_dir: Some(dir.path().join("client_confs")),
        ..ClientConfig::default()
    };

    let manager = PeerManager::new(gateway.clone(), ledger.clone(), lock.clone(), client);
    let reconciler = Reconciler::new(gateway.clone(), ledger.clone(), lock, policy);

    Harness {
        _dir: dir,
        gateway,
        ledger,
        manager,
        reconciler,
    }
}

async fn monthly(ledger: &Ledger, key: &PublicKey, month: YearMonth) -> (u64, u64) {
    let rows = ledger.query_usage(Some(key), Some(month), true).await.unwrap();
    assert_eq!(rows.len(), 1, "expected one usage row for {}", key);
    (rows[0].received, rows[0].sent)
}

#[tokio::test]
async fn test_end_to_end_usage_lifecycle() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let month = YearMonth::current();

    let created = h.manager.create_peer("Alice", "a@b.com").await.unwrap();
    let key = created.peer.public_key.clone();
    assert!(h.gateway.contains(&key));
    assert_eq!(created.peer.address, Some("10.0.1.2/32".parse().unwrap()));

    let saved = h.manager.save_client_config(&created).await.unwrap().unwrap();
    assert_eq!(saved.file_name().unwrap(), "Alice.conf");

    // First sample is the baseline
    h.gateway.set_counters(&key, 1000, 2000).unwrap();
    let collection = h.reconciler.collect(month).await.unwrap();
    assert_eq!(collection.recorded, 1);
    assert_eq!(monthly(&h.ledger, &key, month).await, (0, 0));

    h.gateway.set_counters(&key, 1500, 2500).unwrap();
    h.reconciler.collect(month).await.unwrap();
    assert_eq!(monthly(&h.ledger, &key, month).await, (500, 500));

    let deletion = h.manager.delete_by_email("a@b.com", true).await.unwrap();
    assert_eq!(deletion.removed, vec![key.clone()]);
    assert!(!h.gateway.contains(&key));
    assert!(h.ledger.get_peer(&key).await.unwrap().is_none());

    // History outlives the peer and reports without a name
    let rows = h.ledger.query_usage(Some(&key), Some(month), true).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].received, rows[0].sent), (500, 500));
    assert_eq!(rows[0].name, None);
    assert!(report::usage_table(&rows, false).contains("Unknown"));
}

#[tokio::test]
async fn test_counter_reset_across_restart() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let month = YearMonth::current();
    let key = h.manager.create_peer("Bob", "bob@example.com").await.unwrap().peer.public_key;

    for (received, sent) in [(100, 10), (150, 20)] {
        h.gateway.set_counters(&key, received, sent).unwrap();
        h.reconciler.collect(month).await.unwrap();
    }
    h.gateway.restart();
    h.gateway.set_counters(&key, 40, 5).unwrap();
    h.reconciler.collect(month).await.unwrap();

    assert_eq!(monthly(&h.ledger, &key, month).await, (90, 15));
    let usage = h.ledger.get_usage(&key, month).await.unwrap().unwrap();
    assert_eq!((usage.last_received, usage.last_sent), (40, 5));
}

#[tokio::test]
async fn test_delete_without_history() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let month = YearMonth::current();
    let key = h.manager.create_peer("Carol", "carol@example.com").await.unwrap().peer.public_key;
    h.reconciler.collect(month).await.unwrap();

    h.manager.delete_by_email("carol@example.com", false).await.unwrap();
    let rows = h.ledger.query_usage(Some(&key), None, true).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_delete_unknown_email() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let err = h.manager.delete_by_email("nobody@example.com", true).await.unwrap_err();
    assert!(matches!(err, VpnmonError::NotFound(_)));
}

#[tokio::test]
async fn test_sync_restores_peer_lost_from_interface() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let created = h.manager.create_peer("Dave", "dave@example.com").await.unwrap();
    let key = created.peer.public_key.clone();
    h.gateway.drop_peer(&key);

    let preview = h.reconciler.run(false).await.unwrap();
    assert_eq!(preview.classification.ledger_only.len(), 1);
    assert_eq!(preview.actions[0].outcome, Outcome::Planned);
    assert!(!h.gateway.contains(&key));

    let fixed = h.reconciler.run(true).await.unwrap();
    assert_eq!(fixed.fixed_count(), 1);
    assert_eq!(h.gateway.address_of(&key), created.peer.address);

    // A second pass finds nothing to do
    let again = h.reconciler.run(true).await.unwrap();
    assert!(again.classification.is_in_sync());
    assert!(again.actions.is_empty());
}

#[tokio::test]
async fn test_sync_interface_policy_imports_and_prunes() {
    let h = harness(AuthorityPolicy::Interface).await;
    let month = YearMonth::current();

    let registered = h.manager.create_peer("Erin", "erin@example.com").await.unwrap().peer.public_key;
    h.reconciler.collect(month).await.unwrap();
    h.gateway.drop_peer(&registered);

    let stranger = KeyPair::generate().public;
    h.gateway.insert_peer(stranger.clone(), "10.0.1.50/32".parse().unwrap());

    let report = h.reconciler.run(true).await.unwrap();
    assert!(report.conflicts.is_empty());
    assert_eq!(report.fixed_count(), 2);
    assert!(report.actions.iter().any(|a| a.remedy == Remedy::RemoveFromLedger));

    let imported = h.ledger.get_peer(&stranger).await.unwrap().unwrap();
    assert_eq!(imported.address, Some("10.0.1.50/32".parse().unwrap()));
    assert_eq!(imported.name, None);
    assert!(h.ledger.get_peer(&registered).await.unwrap().is_none());

    // Pruned peers keep their usage
    let rows = h.ledger.query_usage(Some(&registered), None, true).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_collisions_are_reported_not_fixed() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let created = h.manager.create_peer("Frank", "frank@example.com").await.unwrap();
    let address = created.peer.address.unwrap();

    let intruder = KeyPair::generate().public;
    h.gateway.insert_peer(intruder.clone(), address);

    let report = h.reconciler.run(true).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].public_key, intruder);
    assert!(matches!(
        report.conflict_error(),
        Some(VpnmonError::ReconciliationConflict(_))
    ));
    assert!(h.ledger.get_peer(&intruder).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_creates_share_the_lock_file() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let manager = Arc::new(h.manager);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .create_peer(&format!("peer{}", i), &format!("peer{}@example.com", i))
                    .await
            })
        })
        .collect();

    let mut addresses = std::collections::HashSet::new();
    for task in tasks {
        let created = task.await.unwrap().unwrap();
        assert!(addresses.insert(created.peer.address.unwrap()));
    }
    assert_eq!(addresses.len(), 8);
    assert_eq!(h.gateway.peer_count(), 8);
    assert_eq!(h.ledger.list_peers().await.unwrap().len(), 8);

    let live = h.gateway.list_peer_samples().await.unwrap();
    assert_eq!(live.len(), 8);
}

#[tokio::test]
async fn test_accumulated_report_spans_months() {
    let h = harness(AuthorityPolicy::Ledger).await;
    let key = h.manager.create_peer("Grace", "grace@example.com").await.unwrap().peer.public_key;
    let may = YearMonth::new(2024, 5).unwrap();
    let june = YearMonth::new(2024, 6).unwrap();

    for (month, received, sent) in [(may, 100, 100), (may, 300, 200), (june, 350, 260), (june, 400, 300)] {
        h.gateway.set_counters(&key, received, sent).unwrap();
        h.reconciler.collect(month).await.unwrap();
    }

    // The first June sample starts a fresh baseline for that month
    assert_eq!(monthly(&h.ledger, &key, may).await, (200, 100));
    assert_eq!(monthly(&h.ledger, &key, june).await, (50, 40));

    let totals = h.ledger.query_usage(Some(&key), Some(june), false).await.unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].month, None);
    assert_eq!((totals[0].received, totals[0].sent), (250, 140));

    let json = report::usage_json(&totals).unwrap();
    assert!(json.contains("\"received\": 250"));
}
