//! Environment variable overrides
//!
//! Container deployments configure the interface and storage locations
//! through environment variables; these take precedence over the file.

use crate::config::Config;
use crate::error::{Result, VpnmonError};
use ipnet::IpNet;
use std::path::PathBuf;
use tracing::debug;

/// Snapshot of the recognised environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// `WG_INTERFACE`
    pub interface: Option<String>,
    /// `WG_CONFIG_DIR`; the interface file lives in its `wg_confs` subdirectory
    pub config_dir: Option<String>,
    /// `WG_DATA_DIR`
    pub data_dir: Option<String>,
    /// `WG_SUBNET_BASE`, the first three octets of a /24 (e.g. `10.0.1`)
    pub subnet_base: Option<String>,
    /// `SERVER_PORT`
    pub server_port: Option<String>,
    /// `WG_ENDPOINT_HOST`
    pub endpoint_host: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_process() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            interface: get("WG_INTERFACE"),
            config_dir: get("WG_CONFIG_DIR"),
            data_dir: get("WG_DATA_DIR"),
            subnet_base: get("WG_SUBNET_BASE"),
            server_port: get("SERVER_PORT"),
            endpoint_host: get("WG_ENDPOINT_HOST"),
        }
    }

    /// Apply the overrides to a configuration
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(name) = &self.interface {
            debug!("WG_INTERFACE overrides interface name: {}", name);
            config.interface.name = name.clone();
        }

        if let Some(dir) = &self.config_dir {
            config.interface.config_dir = PathBuf::from(dir).join("wg_confs");
        }

        if let Some(dir) = &self.data_dir {
            config.ledger.data_dir = PathBuf::from(dir);
        }

        if let Some(base) = &self.subnet_base {
            config.interface.subnet = parse_subnet_base(base)?;
        }

        if let Some(port) = &self.server_port {
            let port: u16 = port.trim().parse().map_err(|_| {
                VpnmonError::Config(format!("Invalid SERVER_PORT value: {}", port))
            })?;
            config.interface.listen_port = Some(port);
        }

        if let Some(host) = &self.endpoint_host {
            config.interface.endpoint_host = Some(host.clone());
        }

        Ok(())
    }
}

/// Turn a three-octet base such as `10.0.1` into `10.0.1.0/24`
fn parse_subnet_base(base: &str) -> Result<IpNet> {
    let base = base.trim().trim_end_matches('.');
    if base.split('.').count() != 3 {
        return Err(VpnmonError::Config(format!(
            "Invalid WG_SUBNET_BASE '{}' (expected three octets, e.g. 10.0.1)",
            base
        )));
    }

    format!("{}.0/24", base)
        .parse()
        .map_err(|_| VpnmonError::Config(format!("Invalid WG_SUBNET_BASE '{}'", base)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let env = EnvOverrides::from_lookup(lookup(&[
            ("WG_INTERFACE", "wg7"),
            ("WG_CONFIG_DIR", "/config"),
            ("WG_DATA_DIR", "/srv/data"),
            ("WG_SUBNET_BASE", "10.9.8"),
            ("SERVER_PORT", "53"),
        ]));

        let mut config = Config::default();
        env.apply(&mut config).unwrap();

        assert_eq!(config.interface.name, "wg7");
        assert_eq!(
            config.interface.config_file(),
            PathBuf::from("/config/wg_confs/wg7.conf")
        );
        assert_eq!(config.ledger.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.interface.subnet.to_string(), "10.9.8.0/24");
        assert_eq!(config.interface.listen_port, Some(53));
    }

    #[test]
    fn test_empty_values_ignored() {
        let env = EnvOverrides::from_lookup(lookup(&[("WG_INTERFACE", "  ")]));
        let mut config = Config::default();
        env.apply(&mut config).unwrap();
        assert_eq!(config.interface.name, "wg0");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();

        let env = EnvOverrides::from_lookup(lookup(&[("SERVER_PORT", "http")]));
        assert!(env.apply(&mut config).is_err());

        let env = EnvOverrides::from_lookup(lookup(&[("WG_SUBNET_BASE", "10.0")]));
        assert!(env.apply(&mut config).is_err());

        let env = EnvOverrides::from_lookup(lookup(&[("WG_SUBNET_BASE", "10.0.300")]));
        assert!(env.apply(&mut config).is_err());
    }

    #[test]
    #[serial]
    fn test_from_process_environment() {
        std::env::set_var("WG_DATA_DIR", "/tmp/vpnmon-env-test");
        let env = EnvOverrides::from_process();
        std::env::remove_var("WG_DATA_DIR");

        assert_eq!(env.data_dir.as_deref(), Some("/tmp/vpnmon-env-test"));
    }
}
