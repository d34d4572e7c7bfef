//! vpnmon: WireGuard peer registry and usage accounting
//!
//! This library keeps a persisted ledger of WireGuard peers in step with the
//! live interface, and folds the interface's resettable traffic counters into
//! durable monthly usage totals.
//!
//! # Architecture
//!
//! Two sources of truth are kept in agreement without a shared transaction:
//! the running interface (plus its configuration file) and the on-disk ledger.
//! Every run re-reads both; reconciliation is stateless and idempotent.
//!
//! # Modules
//!
//! - `config`: Configuration parsing, environment overrides and validation
//! - `wireguard`: Interface gateway, keys, `wg` dump parsing, config file editing
//! - `ledger`: SQLite-backed peer registry and monthly usage table
//! - `accounting`: Folding raw counter samples into monthly accumulators
//! - `reconcile`: Drift classification, remediation and collection passes
//! - `lifecycle`: Peer creation, deletion and metadata updates
//! - `scheduler`: Periodic collector
//! - `report`: Usage report rendering
//! - `security`: Input validation and privilege detection
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accounting;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod security;
pub mod wireguard;

// Re-export commonly used types
pub use error::{Result, VpnmonError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
