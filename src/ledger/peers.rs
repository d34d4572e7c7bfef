//! Peer registry operations

use super::model::{format_timestamp, parse_timestamp, Peer};
use super::Ledger;
use crate::error::{Result, VpnmonError};
use crate::wireguard::PublicKey;
use chrono::Utc;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, info, warn};

type PeerRowTuple = (String, Option<String>, Option<String>, Option<String>, Option<String>);

const PEER_COLUMNS: &str = "public_key, address, name, email, added_on";

fn peer_from_row(row: PeerRowTuple) -> Result<Peer> {
    let (public_key, address, name, email, added_on) = row;

    let public_key = PublicKey::from_base64(&public_key)
        .map_err(|e| VpnmonError::Storage(format!("Bad public key in ledger: {}", e)))?;
    let address = address
        .map(|a| {
            a.parse::<IpNet>()
                .map_err(|e| VpnmonError::Storage(format!("Bad address '{}' in ledger: {}", a, e)))
        })
        .transpose()?;
    let added_on = match added_on {
        Some(text) => parse_timestamp(&text)?,
        None => Utc::now(),
    };

    Ok(Peer {
        public_key,
        address,
        name,
        email,
        added_on,
    })
}

impl Ledger {
    /// Insert a peer, or update an existing one
    ///
    /// On update, only the fields given as `Some` replace stored values.
    /// An address already held by another peer is a `ConstraintViolation`.
    #[tracing::instrument(skip(self), fields(%public_key))]
    pub async fn upsert_peer(
        &self,
        public_key: &PublicKey,
        address: Option<IpNet>,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Peer> {
        sqlx::query(
            "INSERT INTO peers (public_key, address, name, email, added_on)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(public_key) DO UPDATE SET
                address = COALESCE(excluded.address, peers.address),
                name = COALESCE(excluded.name, peers.name),
                email = COALESCE(excluded.email, peers.email)",
        )
        .bind(public_key.to_base64())
        .bind(address.map(|a| a.to_string()))
        .bind(name)
        .bind(email)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!("Upserted peer");
        self.get_peer(public_key)
            .await?
            .ok_or_else(|| VpnmonError::Storage(format!("Peer {} vanished after upsert", public_key)))
    }

    /// Look up one peer
    #[tracing::instrument(skip(self), fields(%public_key))]
    pub async fn get_peer(&self, public_key: &PublicKey) -> Result<Option<Peer>> {
        let row: Option<PeerRowTuple> =
            sqlx::query_as(&format!("SELECT {} FROM peers WHERE public_key = ?", PEER_COLUMNS))
                .bind(public_key.to_base64())
                .fetch_optional(&self.pool)
                .await?;

        row.map(peer_from_row).transpose()
    }

    /// Every registered peer, ordered by public key
    #[tracing::instrument(skip(self))]
    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        let rows: Vec<PeerRowTuple> =
            sqlx::query_as(&format!("SELECT {} FROM peers ORDER BY public_key", PEER_COLUMNS))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(peer_from_row).collect()
    }

    /// Peers registered with this contact email
    #[tracing::instrument(skip(self))]
    pub async fn find_peers_by_email(&self, email: &str) -> Result<Vec<Peer>> {
        let rows: Vec<PeerRowTuple> = sqlx::query_as(&format!(
            "SELECT {} FROM peers WHERE email = ? ORDER BY public_key",
            PEER_COLUMNS
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(peer_from_row).collect()
    }

    /// Addresses already assigned to registered peers
    pub async fn assigned_addresses(&self) -> Result<HashSet<IpAddr>> {
        let mut addresses = HashSet::new();
        for peer in self.list_peers().await? {
            if let Some(address) = peer.address {
                addresses.insert(address.addr());
            }
        }
        Ok(addresses)
    }

    /// Change a peer's name and/or email
    ///
    /// `None` leaves a field unchanged. Fails with `NotFound` for an
    /// unregistered key.
    #[tracing::instrument(skip(self), fields(%public_key))]
    pub async fn update_peer_info(
        &self,
        public_key: &PublicKey,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Peer> {
        let result = sqlx::query(
            "UPDATE peers SET name = COALESCE(?, name), email = COALESCE(?, email)
             WHERE public_key = ?",
        )
        .bind(name)
        .bind(email)
        .bind(public_key.to_base64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VpnmonError::NotFound(format!(
                "Peer {} is not registered",
                public_key
            )));
        }

        info!("Updated peer info");
        self.get_peer(public_key)
            .await?
            .ok_or_else(|| VpnmonError::NotFound(format!("Peer {} is not registered", public_key)))
    }

    /// Remove a peer, optionally keeping its usage rows
    ///
    /// Returns whether a peer row existed. Without `keep_history` the
    /// usage rows go in the same transaction.
    #[tracing::instrument(skip(self), fields(%public_key))]
    pub async fn delete_peer(&self, public_key: &PublicKey, keep_history: bool) -> Result<bool> {
        let key = public_key.to_base64();
        let mut tx = self.pool.begin().await?;

        if !keep_history {
            let usage = sqlx::query("DELETE FROM monthly_usage WHERE public_key = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await?;
            debug!("Removed {} usage rows", usage.rows_affected());
        }

        let result = sqlx::query("DELETE FROM peers WHERE public_key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let existed = result.rows_affected() > 0;
        if existed {
            info!("Deleted peer (history kept: {})", keep_history);
        } else {
            warn!("No ledger row to delete");
        }
        Ok(existed)
    }
}
