//! Interface gateway
//!
//! The gateway is the only component that touches the live interface and
//! its configuration file. `WgGateway` drives the `wg` command line tool;
//! other implementations (see `MemoryGateway`) follow the same contract.

use crate::config::InterfaceConfig;
use crate::error::{Result, VpnmonError};
use crate::wireguard::conf::{self, WgConfigFile};
use crate::wireguard::dump::{self, InterfaceDump};
use crate::wireguard::peer::host_net;
use crate::wireguard::{KeyPair, LivePeer, PublicKey};
use async_trait::async_trait;
use chrono::Utc;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default WireGuard listen port
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Operations on the live interface
///
/// Mutations (`add_peer`, `remove_peer`) are single-writer: implementations
/// serialise them internally. Callers that allocate an address and then add
/// a peer must hold the lifecycle lock across both calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InterfaceGateway: Send + Sync {
    /// One entry per currently configured live peer, with fresh counters
    async fn list_peer_samples(&self) -> Result<Vec<LivePeer>>;

    /// Configure and persist a peer
    ///
    /// Fails with `DuplicateKey` when the key is already present and with
    /// `ConfigWrite` when the file cannot be updated (the live change is
    /// rolled back in that case).
    async fn add_peer(&self, public_key: &PublicKey, allowed_ip: &IpNet) -> Result<()>;

    /// Deactivate a peer and strip it from the configuration file
    ///
    /// Fails with `NotFound` when the peer is neither live nor configured.
    async fn remove_peer(&self, public_key: &PublicKey) -> Result<()>;

    /// Lowest unused host address in the subnet, skipping `reserved`
    async fn next_free_address_excluding(&self, reserved: &HashSet<IpAddr>) -> Result<IpNet>;

    /// Lowest unused host address in the subnet
    async fn next_free_address(&self) -> Result<IpNet> {
        self.next_free_address_excluding(&HashSet::new()).await
    }

    /// A fresh key pair from a cryptographically secure source
    fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// The interface's own public key
    async fn server_public_key(&self) -> Result<PublicKey>;

    /// `host:port` clients should connect to
    async fn server_endpoint(&self) -> Result<String>;
}

/// Host addresses available to clients: every host except the network
/// address and the first host, which belongs to the server
pub fn client_hosts(subnet: &IpNet) -> impl Iterator<Item = IpAddr> + '_ {
    let network = subnet.network();
    subnet.hosts().filter(move |addr| *addr != network).skip(1)
}

/// Pick the lowest client host of `subnet` not in `used`
pub fn lowest_free_host(subnet: &IpNet, used: &HashSet<IpAddr>) -> Result<IpNet> {
    client_hosts(subnet)
        .find(|addr| !used.contains(addr))
        .map(host_net)
        .ok_or_else(|| {
            VpnmonError::SubnetExhausted(format!(
                "No available addresses in {} ({} in use)",
                subnet,
                used.len()
            ))
        })
}

/// Gateway backed by the `wg` command line tool
pub struct WgGateway {
    interface: String,
    subnet: IpNet,
    endpoint_host: Option<String>,
    listen_port: Option<u16>,
    config_file: WgConfigFile,
    write_lock: Mutex<()>,
}

impl WgGateway {
    /// Create a gateway for the configured interface
    pub fn new(config: &InterfaceConfig) -> Self {
        Self {
            interface: config.name.clone(),
            subnet: config.subnet,
            endpoint_host: config.endpoint_host.clone(),
            listen_port: config.listen_port,
            config_file: WgConfigFile::new(config.config_file()),
            write_lock: Mutex::new(()),
        }
    }

    /// Execute `wg` with arguments and capture stdout
    async fn run_wg(&self, args: &[&str]) -> Result<String> {
        debug!("Executing command: wg {:?}", args);

        let output = Command::new("wg").args(args).output().await.map_err(|e| {
            VpnmonError::Command(format!("Failed to execute wg {}: {}", args.join(" "), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VpnmonError::Command(format!(
                "wg {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn dump(&self) -> Result<InterfaceDump> {
        let output = self.run_wg(&["show", &self.interface, "dump"]).await?;
        Ok(dump::parse_dump(&output, Utc::now()))
    }

    async fn set_peer(&self, public_key: &PublicKey, allowed_ip: &IpNet) -> Result<()> {
        let key = public_key.to_base64();
        let ip = allowed_ip.to_string();
        self.run_wg(&["set", &self.interface, "peer", &key, "allowed-ips", &ip])
            .await
            .map(|_| ())
    }

    async fn unset_peer(&self, public_key: &PublicKey) -> Result<()> {
        let key = public_key.to_base64();
        self.run_wg(&["set", &self.interface, "peer", &key, "remove"])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl InterfaceGateway for WgGateway {
    async fn list_peer_samples(&self) -> Result<Vec<LivePeer>> {
        let dump = self.dump().await?;
        debug!("Read {} live peers from {}", dump.peers.len(), self.interface);
        Ok(dump.peers)
    }

    async fn add_peer(&self, public_key: &PublicKey, allowed_ip: &IpNet) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let live = self.dump().await?;
        let text = self.config_file.read().await?;
        if live.peers.iter().any(|p| p.public_key() == public_key)
            || conf::contains_peer(&text, public_key)
        {
            return Err(VpnmonError::DuplicateKey(public_key.to_base64()));
        }

        info!("Adding peer {} with allowed IP {}", public_key, allowed_ip);
        self.set_peer(public_key, allowed_ip).await?;

        let updated = conf::append_peer(&text, public_key, allowed_ip);
        if let Err(e) = self.config_file.write(&updated).await {
            error!("Config write failed, removing live peer {}: {}", public_key, e);
            if let Err(rollback) = self.unset_peer(public_key).await {
                warn!("Failed to roll back live peer {}: {}", public_key, rollback);
            }
            return Err(e);
        }

        Ok(())
    }

    async fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let live = self.dump().await?;
        let is_live = live.peers.iter().any(|p| p.public_key() == public_key);
        let text = self.config_file.read().await?;
        let stripped = conf::remove_peer(&text, public_key);

        if !is_live && stripped.is_none() {
            return Err(VpnmonError::NotFound(format!(
                "Peer {} is not configured on {}",
                public_key, self.interface
            )));
        }

        if is_live {
            info!("Removing peer {} from {}", public_key, self.interface);
            self.unset_peer(public_key).await?;
        }

        match stripped {
            Some(updated) => self.config_file.write(&updated).await?,
            None => warn!(
                "Peer {} was live but missing from {:?}",
                public_key,
                self.config_file.path()
            ),
        }

        Ok(())
    }

    async fn next_free_address_excluding(&self, reserved: &HashSet<IpAddr>) -> Result<IpNet> {
        let text = self.config_file.read().await?;
        let mut used: HashSet<IpAddr> = reserved.clone();
        used.extend(conf::assigned_networks(&text).iter().map(|n| n.addr()));

        let live = self.dump().await?;
        for peer in &live.peers {
            used.extend(peer.host_addresses());
        }

        let next = lowest_free_host(&self.subnet, &used)?;
        info!("Found available address: {}", next);
        Ok(next)
    }

    async fn server_public_key(&self) -> Result<PublicKey> {
        let output = self.run_wg(&["show", &self.interface, "public-key"]).await?;
        PublicKey::from_base64(output.trim())
    }

    async fn server_endpoint(&self) -> Result<String> {
        let host = self.endpoint_host.as_deref().ok_or_else(|| {
            VpnmonError::Config("interface.endpoint_host is not configured".to_string())
        })?;

        let port = match self.listen_port {
            Some(port) => port,
            None => match self.run_wg(&["show", &self.interface, "listen-port"]).await {
                Ok(output) => output.trim().parse().unwrap_or(DEFAULT_LISTEN_PORT),
                Err(e) => {
                    warn!("Could not read listen port, using {}: {}", DEFAULT_LISTEN_PORT, e);
                    DEFAULT_LISTEN_PORT
                }
            },
        };

        Ok(format!("{}:{}", host, port))
    }
}
