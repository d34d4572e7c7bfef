//! Error types for vpnmon
//!
//! This module defines the error types used throughout the application.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.

use thiserror::Error;

/// Main error type for vpnmon operations
#[derive(Error, Debug)]
pub enum VpnmonError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The WireGuard configuration file could not be updated
    #[error("Failed to write WireGuard configuration: {0}")]
    ConfigWrite(String),

    /// A peer with this public key is already present
    #[error("Duplicate public key: {0}")]
    DuplicateKey(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// No unused host address remains in the configured subnet
    #[error("Subnet exhausted: {0}")]
    SubnetExhausted(String),

    /// Ledger storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A ledger constraint (unique address, counter range) was violated
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Drift that the configured authority policy cannot resolve automatically
    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    /// A `wg` invocation failed
    #[error("Command failed: {0}")]
    Command(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using VpnmonError
pub type Result<T> = std::result::Result<T, VpnmonError>;

impl From<sqlx::Error> for VpnmonError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                VpnmonError::ConstraintViolation(db_err.message().to_string())
            }
            other => VpnmonError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VpnmonError {
    fn from(err: serde_json::Error) -> Self {
        VpnmonError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VpnmonError {
    fn from(err: toml::de::Error) -> Self {
        VpnmonError::Config(err.to_string())
    }
}
