//! Drift classification

use crate::wireguard::PublicKey;
use serde::Serialize;
use std::collections::BTreeSet;

/// Where a public key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Drift {
    /// On the interface, not in the ledger
    LiveOnly,
    /// In the ledger, not on the interface
    LedgerOnly,
}

/// Partition of every observed key into exactly one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Keys only on the live interface
    pub live_only: BTreeSet<PublicKey>,
    /// Keys only in the ledger
    pub ledger_only: BTreeSet<PublicKey>,
    /// Keys present on both sides
    pub consistent: BTreeSet<PublicKey>,
}

impl Classification {
    /// True when both sides hold the same keys
    pub fn is_in_sync(&self) -> bool {
        self.live_only.is_empty() && self.ledger_only.is_empty()
    }

    /// Number of keys observed on either side
    pub fn len(&self) -> usize {
        self.live_only.len() + self.ledger_only.len() + self.consistent.len()
    }

    /// True when neither side holds any key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split the union of both key sets into live-only, ledger-only and consistent
pub fn classify<'a, L, R>(live: L, ledger: R) -> Classification
where
    L: IntoIterator<Item = &'a PublicKey>,
    R: IntoIterator<Item = &'a PublicKey>,
{
    let live: BTreeSet<PublicKey> = live.into_iter().cloned().collect();
    let ledger: BTreeSet<PublicKey> = ledger.into_iter().cloned().collect();

    Classification {
        live_only: live.difference(&ledger).cloned().collect(),
        ledger_only: ledger.difference(&live).cloned().collect(),
        consistent: live.intersection(&ledger).cloned().collect(),
    }
}
