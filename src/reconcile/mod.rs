//! Reconciliation engine
//!
//! Each run re-reads the live interface and the ledger, sorts every public
//! key into live-only, ledger-only or consistent, and optionally repairs
//! the drift. Runs keep no state between invocations, so repeating one is
//! harmless.

mod classify;
mod engine;
mod policy;

pub use classify::{classify, Classification, Drift};
pub use engine::{
    CollectionFailure, CollectionReport, Conflict, ConflictKind, Outcome, Reconciler, Remedy,
    SyncAction, SyncReport,
};
pub use policy::AuthorityPolicy;
