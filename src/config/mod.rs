//! Configuration management
//!
//! This module handles parsing of the static TOML configuration file,
//! environment overrides inherited from container deployments, and
//! validation of the merged result.

mod env;
mod validation;

pub use env::EnvOverrides;

use crate::error::{Result, VpnmonError};
use crate::reconcile::AuthorityPolicy;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vpnmon/config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Live WireGuard interface settings
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Ledger storage settings
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Reconciliation policy
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Periodic collector settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Settings used when rendering client configurations
    #[serde(default)]
    pub client: ClientConfig,
}

/// Live interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// WireGuard interface name (e.g., "wg0")
    #[serde(default = "default_interface")]
    pub name: String,

    /// Directory holding `<name>.conf`
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Explicit configuration file path, overriding `config_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    /// Client address pool; the first host belongs to the server
    #[serde(default = "default_subnet")]
    pub subnet: IpNet,

    /// Public host name or address clients connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_host: Option<String>,

    /// Listen port advertised to clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

/// Ledger storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the database and the lifecycle lock file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Reconciliation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Which side wins when a peer exists only in the ledger
    #[serde(default)]
    pub authority: AuthorityPolicy,
}

/// Periodic collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between collection passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Log a report-only reconciliation after every pass
    #[serde(default)]
    pub report_drift: bool,
}

/// Client configuration rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// DNS servers pushed to clients
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,

    /// Routes clients send through the tunnel
    #[serde(default = "default_client_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// Persistent keepalive interval in seconds (0 disables)
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,

    /// Where generated client configurations are saved
    #[serde(default = "default_output_dir")]
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            VpnmonError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| VpnmonError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Load the file if it exists, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            debug!("Config file {:?} not found, using defaults", path);
            Self::default()
        };

        EnvOverrides::from_process().apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_interface_name(&self.interface.name)?;
        validation::validate_subnet(&self.interface.subnet)?;
        validation::validate_interval(self.scheduler.interval_secs)?;
        validation::validate_keepalive(self.client.persistent_keepalive)?;

        for cidr in &self.client.allowed_ips {
            validation::validate_cidr(cidr)?;
        }
        for dns in &self.client.dns {
            validation::validate_ip_address(dns)?;
        }

        Ok(())
    }
}

impl InterfaceConfig {
    /// Path of the WireGuard configuration file for this interface
    pub fn config_file(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.config_dir.join(format!("{}.conf", self.name)))
    }
}

impl LedgerConfig {
    /// Path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("usage.db")
    }

    /// Path of the cross-process lifecycle lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("vpnmon.lock")
    }
}

impl SchedulerConfig {
    /// Interval between collection passes
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface(),
            config_dir: default_config_dir(),
            config_path: None,
            subnet: default_subnet(),
            endpoint_host: None,
            listen_port: None,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            report_drift: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dns: default_dns(),
            allowed_ips: default_client_allowed_ips(),
            persistent_keepalive: default_keepalive(),
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions for serde
fn default_interface() -> String {
    "wg0".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/config/wg_confs")
}

fn default_subnet() -> IpNet {
    IpNet::V4(ipnet::Ipv4Net::new(std::net::Ipv4Addr::new(10, 0, 1, 0), 24).unwrap_or_default())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_interval_secs() -> u64 {
    300
}

fn default_dns() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_client_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

fn default_keepalive() -> u16 {
    25
}

fn default_output_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/config/client_confs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [interface]
            name = "wg1"
            config_dir = "/etc/wireguard"
            subnet = "10.8.0.0/28"
            endpoint_host = "vpn.example.com"
            listen_port = 53

            [ledger]
            data_dir = "/var/lib/vpnmon"

            [reconcile]
            authority = "interface"

            [scheduler]
            interval_secs = 60
            report_drift = true

            [client]
            dns = ["9.9.9.9"]
            allowed_ips = ["10.8.0.0/28"]
            persistent_keepalive = 0
        "#;

        let config = Config::parse(toml).expect("Failed to parse TOML");
        assert_eq!(config.interface.name, "wg1");
        assert_eq!(config.interface.config_file(), PathBuf::from("/etc/wireguard/wg1.conf"));
        assert_eq!(config.interface.subnet.to_string(), "10.8.0.0/28");
        assert_eq!(config.interface.listen_port, Some(53));
        assert_eq!(config.ledger.database_path(), PathBuf::from("/var/lib/vpnmon/usage.db"));
        assert_eq!(config.reconcile.authority, AuthorityPolicy::Interface);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        assert!(config.scheduler.report_drift);
        assert_eq!(config.client.persistent_keepalive, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::parse("").expect("Failed to parse TOML");

        assert_eq!(config.interface.name, "wg0");
        assert_eq!(config.interface.config_file(), PathBuf::from("/config/wg_confs/wg0.conf"));
        assert_eq!(config.interface.subnet.to_string(), "10.0.1.0/24");
        assert_eq!(config.ledger.lock_path(), PathBuf::from("/data/vpnmon.lock"));
        assert_eq!(config.reconcile.authority, AuthorityPolicy::Ledger);
        assert_eq!(config.scheduler.interval_secs, 300);
        assert_eq!(config.client.dns.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let toml = r#"
            [interface]
            config_path = "/tmp/custom.conf"
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.interface.config_file(), PathBuf::from("/tmp/custom.conf"));
    }

    #[test]
    fn test_invalid_authority_rejected() {
        let toml = r#"
            [reconcile]
            authority = "both"
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.scheduler.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml"));
        // Environment overrides may apply, but the load itself must succeed.
        assert!(config.is_ok());
    }
}
