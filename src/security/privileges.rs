//! Privilege detection
//!
//! Reading counters and editing the interface need root (or
//! CAP_NET_ADMIN); commands warn early instead of failing halfway.

use tracing::warn;

/// Privilege level of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    /// Running as root
    Root,
    /// Running as regular user
    User,
    /// Unknown privilege level
    Unknown,
}

impl PrivilegeLevel {
    /// Detect current privilege level
    pub fn detect() -> Self {
        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            let euid = unsafe { libc::geteuid() };

            if uid == 0 || euid == 0 {
                return Self::Root;
            }
            Self::User
        }

        #[cfg(not(unix))]
        {
            Self::Unknown
        }
    }

    /// Check if elevated
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Root)
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::User => write!(f, "user"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Warn when `action` is about to run without root
///
/// Returns whether the process is elevated.
pub fn warn_if_unprivileged(action: &str) -> bool {
    let level = PrivilegeLevel::detect();
    if !level.is_elevated() {
        warn!(
            "Running '{}' as {}; wg commands and config edits usually require root",
            action, level
        );
    }
    level.is_elevated()
}
