//! WireGuard configuration file editing
//!
//! The interface's `.conf` file is the persistent half of the live state:
//! `wg set` changes are lost on restart unless mirrored here. Edits keep
//! every unrelated line intact, take a backup first and replace the file
//! atomically.

use crate::error::{Result, VpnmonError};
use crate::wireguard::dump::parse_allowed_ips;
use crate::wireguard::PublicKey;
use ipnet::IpNet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A `[Section]` of the configuration file and the lines belonging to it
#[derive(Debug, Clone)]
struct Section<'a> {
    header: Option<&'a str>,
    lines: Vec<&'a str>,
}

impl Section<'_> {
    fn is_peer(&self) -> bool {
        self.header
            .map(|h| h.trim().eq_ignore_ascii_case("[peer]"))
            .unwrap_or(false)
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (name, value) = line.split_once('=')?;
            if name.trim().eq_ignore_ascii_case(key) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    fn values<'s>(&'s self, key: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.lines.iter().filter_map(move |line| {
            let (name, value) = line.split_once('=')?;
            if name.trim().eq_ignore_ascii_case(key) {
                Some(value.trim())
            } else {
                None
            }
        })
    }
}

fn sections(text: &str) -> Vec<Section<'_>> {
    let mut out = vec![Section {
        header: None,
        lines: Vec::new(),
    }];

    for line in text.lines() {
        if line.trim_start().starts_with('[') {
            out.push(Section {
                header: Some(line),
                lines: Vec::new(),
            });
        } else if let Some(current) = out.last_mut() {
            current.lines.push(line);
        }
    }

    out
}

/// Whether a `[Peer]` section with this public key exists
pub fn contains_peer(text: &str, public_key: &PublicKey) -> bool {
    let wanted = public_key.to_base64();
    sections(text)
        .iter()
        .any(|s| s.is_peer() && s.value("PublicKey") == Some(wanted.as_str()))
}

/// Every address the file assigns: peer `AllowedIPs` plus the interface `Address`
pub fn assigned_networks(text: &str) -> Vec<IpNet> {
    let mut nets = Vec::new();
    for section in sections(text) {
        let key = if section.is_peer() { "AllowedIPs" } else { "Address" };
        for value in section.values(key) {
            nets.extend(parse_allowed_ips(value));
        }
    }
    nets
}

/// Append a `[Peer]` section
pub fn append_peer(text: &str, public_key: &PublicKey, allowed_ip: &IpNet) -> String {
    let mut out = text.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&format!(
        "[Peer]\nPublicKey = {}\nAllowedIPs = {}\n",
        public_key, allowed_ip
    ));
    out
}

/// Strip the `[Peer]` section carrying this key; `None` when it is absent
pub fn remove_peer(text: &str, public_key: &PublicKey) -> Option<String> {
    let wanted = public_key.to_base64();
    let mut found = false;
    let mut kept: Vec<&str> = Vec::new();

    for section in sections(text) {
        if section.is_peer() && section.value("PublicKey") == Some(wanted.as_str()) {
            found = true;
            continue;
        }
        if let Some(header) = section.header {
            kept.push(header);
        }
        kept.extend(section.lines.iter().copied());
    }

    if !found {
        return None;
    }

    let mut out = kept.join("\n").trim_end().to_string();
    out.push('\n');
    Some(out)
}

/// The interface configuration file on disk
#[derive(Debug, Clone)]
pub struct WgConfigFile {
    path: PathBuf,
}

impl WgConfigFile {
    /// Wrap a configuration file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push("_backup_");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read the file; a missing file reads as empty
    pub async fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("WireGuard config {:?} does not exist yet", self.path);
                Ok(String::new())
            }
            Err(e) => Err(VpnmonError::Config(format!(
                "Failed to read WireGuard config {:?}: {}",
                self.path, e
            ))),
        }
    }

    /// Replace the file contents, restoring the backup if the write fails
    pub async fn write(&self, contents: &str) -> Result<()> {
        let had_original = fs::try_exists(&self.path).await.unwrap_or(false);
        if had_original {
            fs::copy(&self.path, self.backup_path()).await.map_err(|e| {
                VpnmonError::ConfigWrite(format!(
                    "Failed to back up {:?}: {}",
                    self.path, e
                ))
            })?;
        }

        if let Err(e) = self.write_atomic(contents).await {
            let _ = fs::remove_file(self.temp_path()).await;
            if had_original {
                warn!("Restoring {:?} from backup after failed write", self.path);
                if let Err(restore) = fs::copy(self.backup_path(), &self.path).await {
                    warn!("Failed to restore {:?} from backup: {}", self.path, restore);
                }
            }
            return Err(VpnmonError::ConfigWrite(format!(
                "Failed to write {:?}: {}",
                self.path, e
            )));
        }

        info!("Updated WireGuard config {:?}", self.path);
        Ok(())
    }

    async fn write_atomic(&self, contents: &str) -> std::io::Result<()> {
        let temp = self.temp_path();
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &self.path).await
    }
}
