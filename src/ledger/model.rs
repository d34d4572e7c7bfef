//! Ledger record types

use crate::error::{Result, VpnmonError};
use crate::wireguard::PublicKey;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A calendar month, written `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Build a month, rejecting anything outside 0000-01..9999-12
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(0..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(VpnmonError::Validation(format!(
                "Invalid month {}-{}",
                year, month
            )));
        }
        Ok(Self { year, month })
    }

    /// The current month in local time
    pub fn current() -> Self {
        let now = Local::now();
        Self {
            year: now.year(),
            month: now.month(),
        }
    }

    /// The month a UTC instant falls in
    pub fn of(instant: &DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
        }
    }

    /// Year component
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Month component (1-12)
    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = VpnmonError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VpnmonError::Validation(format!("Invalid month '{}' (expected YYYY-MM)", s));

        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        let (year, month) = (&s[..4], &s[5..]);
        if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A registered peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// Peer identity
    pub public_key: PublicKey,
    /// Assigned tunnel address
    pub address: Option<IpNet>,
    /// Display name
    pub name: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// When the peer was registered
    pub added_on: DateTime<Utc>,
}

/// One peer's usage for one month
///
/// `accumulated_*` only ever grow; `last_*` hold the most recent raw
/// counters and are the baseline for the next delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyUsage {
    /// Peer identity
    pub public_key: PublicKey,
    /// Month the row accumulates
    pub month: YearMonth,
    /// Bytes received this month
    pub accumulated_received: u64,
    /// Bytes sent this month
    pub accumulated_sent: u64,
    /// Last raw received counter
    pub last_received: u64,
    /// Last raw sent counter
    pub last_sent: u64,
    /// Time of the last sample
    pub last_updated: DateTime<Utc>,
}

/// A usage report line
///
/// `month` is `None` for totals summed across months. `name` and `email`
/// are `None` for usage kept after its peer was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRow {
    /// Peer identity
    pub public_key: PublicKey,
    /// Display name, if the peer is still registered
    pub name: Option<String>,
    /// Contact email, if the peer is still registered
    pub email: Option<String>,
    /// Month covered, or `None` for accumulated totals
    pub month: Option<YearMonth>,
    /// Bytes received
    pub received: u64,
    /// Bytes sent
    pub sent: u64,
    /// Most recent sample time
    pub last_updated: DateTime<Utc>,
}

impl UsageRow {
    /// Received plus sent
    pub fn total(&self) -> u64 {
        self.received.saturating_add(self.sent)
    }
}

/// Format a timestamp for storage
pub(crate) fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339()
}

/// Parse a stored timestamp
///
/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS` text SQLite's
/// `CURRENT_TIMESTAMP` produces in databases created by older releases.
pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| VpnmonError::Storage(format!("Invalid timestamp '{}': {}", text, e)))
}

/// Convert a counter for storage in a signed 64-bit column
///
/// Values above `i64::MAX` are refused rather than wrapped; stored
/// counters must stay non-negative for the summing report queries.
pub(crate) fn counter_to_db(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        VpnmonError::ConstraintViolation(format!("Counter {} exceeds storable range", value))
    })
}

/// Convert a stored counter back
pub(crate) fn counter_from_db(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| VpnmonError::Storage(format!("Negative counter {} in ledger", value)))
}
