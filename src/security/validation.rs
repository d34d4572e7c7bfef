//! Input validation and sanitization
//!
//! Checks applied to administrator input before it reaches the ledger or
//! the filesystem.

use crate::error::{Result, VpnmonError};
use tracing::warn;

/// Maximum length of a peer display name
pub const MAX_NAME_LEN: usize = 64;

/// Validate an email address of the form `local@domain.tld`
///
/// The local part may contain ASCII alphanumerics and `._%+-`, the domain
/// ASCII alphanumerics, `.` and `-`, and the final label must be at least
/// two letters.
pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || VpnmonError::Validation(format!("Invalid email format: {}", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return Err(invalid());
    }

    // The domain takes the longest run before the final dot
    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(invalid());
    }
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }

    Ok(())
}

/// Validate a peer display name
pub fn validate_peer_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(VpnmonError::Validation(
            "Peer name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(VpnmonError::Validation(format!(
            "Peer name too long (max {} characters)",
            MAX_NAME_LEN
        )));
    }

    if name.chars().any(char::is_control) {
        warn!("Rejected peer name with control characters");
        return Err(VpnmonError::Validation(
            "Peer name cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Turn a display name into a file name stem
///
/// Spaces become `_`, `/` becomes `-`, then only alphanumerics, `_` and
/// `-` are kept. Falls back to `peer` when nothing is left.
pub fn safe_file_name(name: &str) -> String {
    let stem: String = name
        .replace(' ', "_")
        .replace('/', "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if stem.is_empty() {
        "peer".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.com").is_ok());
        assert!(validate_email("first.last+vpn@mail.example.org").is_ok());
        assert!(validate_email("x_y%z-1@sub-domain.io").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("@b.com").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@b.c").is_err());
        assert!(validate_email("a@b.c0m").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_validate_peer_name() {
        assert!(validate_peer_name("Alice Smith").is_ok());
        assert!(validate_peer_name("   ").is_err());
        assert!(validate_peer_name("bad\nname").is_err());
        assert!(validate_peer_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("Alice Smith"), "Alice_Smith");
        assert_eq!(safe_file_name("ops/laptop"), "ops-laptop");
        assert_eq!(safe_file_name("../../etc/passwd"), "--etc-passwd");
        assert_eq!(safe_file_name("José's phone!"), "Josés_phone");
        assert_eq!(safe_file_name("!!!"), "peer");
    }
}
