//! Parser for `wg show <interface> dump`
//!
//! The first line describes the interface itself:
//! `private-key  public-key  listen-port  fwmark`.
//! Every following line describes one peer:
//! `public-key  preshared-key  endpoint  allowed-ips  latest-handshake
//!  transfer-rx  transfer-tx  persistent-keepalive`.

use crate::wireguard::{LivePeer, PublicKey, RawSample};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use tracing::warn;

/// Parsed dump output
#[derive(Debug, Clone, Default)]
pub struct InterfaceDump {
    /// The interface's own public key, when the header line was present
    pub public_key: Option<PublicKey>,
    /// Listen port from the header line
    pub listen_port: Option<u16>,
    /// Peers in the order `wg` reported them
    pub peers: Vec<LivePeer>,
}

/// Parse the full dump; malformed peer lines are skipped with a warning
pub fn parse_dump(output: &str, observed_at: DateTime<Utc>) -> InterfaceDump {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let mut dump = InterfaceDump::default();

    if let Some(header) = lines.next() {
        let fields: Vec<&str> = header.split('\t').collect();
        if fields.len() >= 3 {
            dump.public_key = PublicKey::from_base64(fields[1]).ok();
            dump.listen_port = fields[2].trim().parse().ok();
        }
    }

    for line in lines {
        match parse_peer_line(line, observed_at) {
            Some(peer) => dump.peers.push(peer),
            None => warn!("Skipping malformed wg dump line: {:?}", line),
        }
    }

    dump
}

fn parse_peer_line(line: &str, observed_at: DateTime<Utc>) -> Option<LivePeer> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return None;
    }

    let public_key = PublicKey::from_base64(fields[0]).ok()?;
    let received: u64 = fields[5].trim().parse().ok()?;
    let sent: u64 = fields[6].trim().parse().ok()?;

    Some(LivePeer {
        sample: RawSample {
            public_key,
            received,
            sent,
            observed_at,
        },
        allowed_ips: parse_allowed_ips(fields[3]),
    })
}

/// Parse a comma separated allowed-ips field; `(none)` yields nothing
pub fn parse_allowed_ips(field: &str) -> Vec<IpNet> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "(none)")
        .filter_map(|s| match s.parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(_) => {
                warn!("Ignoring unparsable allowed IP {:?}", s);
                None
            }
        })
        .collect()
}
