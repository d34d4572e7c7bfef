//! File permission checks
//!
//! WireGuard configuration files, server and client alike, hold private
//! keys and must not be readable by group or others.

use crate::error::{Result, VpnmonError};
use std::path::Path;
use tracing::{debug, warn};

/// Mode bits allowed on a file holding a private key
#[cfg(unix)]
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Fail when a key-bearing file is accessible to group or others
#[cfg(unix)]
pub fn validate_private_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    debug!("Validating permissions for {:?}", path);

    let metadata = std::fs::metadata(path).map_err(|e| {
        VpnmonError::Validation(format!("Failed to read metadata for {:?}: {}", path, e))
    })?;

    let mode = metadata.permissions().mode() & 0o777;
    if mode & !PRIVATE_FILE_MODE != 0 {
        warn!(
            "File {:?} has insecure permissions: {:o} (max: {:o})",
            path, mode, PRIVATE_FILE_MODE
        );
        return Err(VpnmonError::Validation(format!(
            "File {:?} has insecure permissions {:o}, expected 0600 (owner read/write only)",
            path, mode
        )));
    }

    Ok(())
}

/// Permission checks are not implemented on this platform
#[cfg(not(unix))]
pub fn validate_private_file(path: &Path) -> Result<()> {
    debug!("Permission validation not implemented for this platform: {:?}", path);
    Ok(())
}
