//! Authority policy for ledger-only peers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side wins when a peer is in the ledger but not on the interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityPolicy {
    /// Put the peer back on the interface at its recorded address
    #[default]
    Ledger,
    /// Drop the ledger row, keeping its usage history
    Interface,
}

impl fmt::Display for AuthorityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityPolicy::Ledger => write!(f, "ledger"),
            AuthorityPolicy::Interface => write!(f, "interface"),
        }
    }
}

impl FromStr for AuthorityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ledger" => Ok(AuthorityPolicy::Ledger),
            "interface" => Ok(AuthorityPolicy::Interface),
            other => Err(format!(
                "Unknown authority policy '{}' (expected 'ledger' or 'interface')",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("ledger".parse::<AuthorityPolicy>().unwrap(), AuthorityPolicy::Ledger);
        assert_eq!("Interface".parse::<AuthorityPolicy>().unwrap(), AuthorityPolicy::Interface);
        assert!("both".parse::<AuthorityPolicy>().is_err());
        assert_eq!(AuthorityPolicy::Interface.to_string(), "interface");
        assert_eq!(AuthorityPolicy::default(), AuthorityPolicy::Ledger);
    }

    #[test]
    fn test_policy_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            authority: AuthorityPolicy,
        }
        let parsed: Wrapper = toml::from_str("authority = \"interface\"").unwrap();
        assert_eq!(parsed.authority, AuthorityPolicy::Interface);
    }
}
