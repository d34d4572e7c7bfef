//! Client configuration rendering

use crate::config::ClientConfig;
use crate::error::{Result, VpnmonError};
use crate::security::safe_file_name;
use crate::wireguard::{PrivateKey, PublicKey};
use ipnet::IpNet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Everything a client needs to connect
#[derive(Debug, Clone)]
pub struct ClientProfile {
    /// Client private key
    pub private_key: PrivateKey,
    /// Tunnel address assigned to the client
    pub address: IpNet,
    /// Server public key
    pub server_public_key: PublicKey,
    /// Server `host:port`
    pub endpoint: String,
}

impl ClientProfile {
    /// Render a `wg-quick` style configuration file
    pub fn render(&self, settings: &ClientConfig) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "[Interface]");
        let _ = writeln!(out, "PrivateKey = {}", self.private_key.to_base64());
        let _ = writeln!(out, "Address = {}", self.address);
        if !settings.dns.is_empty() {
            let _ = writeln!(out, "DNS = {}", settings.dns.join(", "));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey = {}", self.server_public_key);
        let _ = writeln!(out, "AllowedIPs = {}", settings.allowed_ips.join(", "));
        let _ = writeln!(out, "Endpoint = {}", self.endpoint);
        if settings.persistent_keepalive > 0 {
            let _ = writeln!(out, "PersistentKeepalive = {}", settings.persistent_keepalive);
        }

        out
    }
}

/// Save a rendered configuration as `<dir>/<safe name>.conf`, mode 0600
pub async fn save(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.conf", safe_file_name(name)));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&path).await.map_err(|e| {
        VpnmonError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create {:?}: {}", path, e),
        ))
    })?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;

    info!("Client configuration saved to {:?}", path);
    Ok(path)
}
