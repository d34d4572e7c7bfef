//! Report rendering
//!
//! Plain-text tables and JSON for the `usage`, `sync` and `collect`
//! commands. Byte counts are shown in GB (1024^3 bytes) with two decimals.

use crate::error::Result;
use crate::ledger::UsageRow;
use crate::reconcile::{CollectionReport, Outcome, Remedy, SyncReport};
use serde::Serialize;
use std::fmt::Write as _;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Shown for usage whose peer has been deleted
const UNKNOWN: &str = "Unknown";

/// Bytes as GB, rounded to two decimals
pub fn to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 100.0).round() / 100.0
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!(" {}{} ", cell, " ".repeat(w - cell.chars().count())))
            .collect();
        format!("|{}|\n", padded.join("|"))
    };

    let mut out = separator.clone();
    out.push_str(&line(headers));
    out.push_str(&separator.replace('-', "="));
    for row in rows {
        out.push_str(&line(row));
        out.push_str(&separator);
    }
    out
}

/// Usage rows as a grid table
pub fn usage_table(rows: &[UsageRow], accumulated: bool) -> String {
    let kind = if accumulated { "Accumulated" } else { "Monthly" };
    let headers: Vec<String> = vec![
        "Public Key".to_string(),
        "Name".to_string(),
        "Email".to_string(),
        "Month".to_string(),
        format!("{} GB Received", kind),
        format!("{} GB Sent", kind),
        format!("{} GB Total", kind),
        "Last Updated".to_string(),
    ];

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.public_key.to_base64(),
                row.name.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                row.email.clone().unwrap_or_default(),
                row.month
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "all".to_string()),
                format!("{:.2}", to_gb(row.received)),
                format!("{:.2}", to_gb(row.sent)),
                format!("{:.2}", to_gb(row.total())),
                row.last_updated.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();

    render_table(&headers, &cells)
}

#[derive(Serialize)]
struct UsageEntry<'a> {
    #[serde(flatten)]
    row: &'a UsageRow,
    received_gb: f64,
    sent_gb: f64,
    total_gb: f64,
}

/// Usage rows as pretty-printed JSON
pub fn usage_json(rows: &[UsageRow]) -> Result<String> {
    let entries: Vec<UsageEntry<'_>> = rows
        .iter()
        .map(|row| UsageEntry {
            row,
            received_gb: to_gb(row.received),
            sent_gb: to_gb(row.sent),
            total_gb: to_gb(row.total()),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

fn describe_remedy(remedy: &Remedy) -> String {
    match remedy {
        Remedy::ImportToLedger { address: Some(a) } => format!("add to ledger ({})", a),
        Remedy::ImportToLedger { address: None } => "add to ledger (no address)".to_string(),
        Remedy::AddToInterface { address } => format!("add to interface ({})", address),
        Remedy::RemoveFromLedger => "remove from ledger, keep usage".to_string(),
    }
}

/// Human-readable reconciliation summary
pub fn sync_summary(report: &SyncReport) -> String {
    let c = &report.classification;
    let mut out = String::new();

    if c.is_in_sync() {
        let _ = writeln!(out, "WireGuard and ledger are in sync");
        let _ = writeln!(out, "  {} peers found in both", c.consistent.len());
    } else {
        let _ = writeln!(out, "Found inconsistencies (policy: {}):", report.policy);
        if !c.live_only.is_empty() {
            let _ = writeln!(out, "  {} peers on the interface but missing from the ledger:", c.live_only.len());
            for key in &c.live_only {
                let _ = writeln!(out, "    - {}", key);
            }
        }
        if !c.ledger_only.is_empty() {
            let _ = writeln!(out, "  {} peers in the ledger but missing from the interface:", c.ledger_only.len());
            for key in &c.ledger_only {
                let _ = writeln!(out, "    - {}", key);
            }
        }
    }

    if !report.actions.is_empty() {
        let _ = writeln!(out, "Actions:");
        for action in &report.actions {
            let status = match &action.outcome {
                Outcome::Planned => "planned".to_string(),
                Outcome::Applied => "applied".to_string(),
                Outcome::Failed(e) => format!("failed: {}", e),
            };
            let _ = writeln!(
                out,
                "  {} {} [{}]",
                action.public_key,
                describe_remedy(&action.remedy),
                status
            );
        }
        if report.auto_fix {
            let _ = writeln!(out, "Fixed {} of {}", report.fixed_count(), report.actions.len());
        } else {
            let _ = writeln!(out, "Run with --fix to apply");
        }
    }

    if !report.conflicts.is_empty() {
        let _ = writeln!(out, "Conflicts (not fixed automatically):");
        for conflict in &report.conflicts {
            let address = conflict
                .address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "no address".to_string());
            match &conflict.holder {
                Some(holder) => {
                    let _ = writeln!(
                        out,
                        "  {} {:?} {} also held by {}",
                        conflict.public_key, conflict.kind, address, holder
                    );
                }
                None => {
                    let _ = writeln!(out, "  {} {:?} ({})", conflict.public_key, conflict.kind, address);
                }
            }
        }
    }

    out
}

/// One-line collection summary
pub fn collection_summary(report: &CollectionReport) -> String {
    if report.is_complete() {
        format!(
            "Collected {} samples for {} ({} unregistered peers skipped)",
            report.recorded, report.month, report.skipped_unregistered
        )
    } else {
        format!(
            "Collected {} samples for {}; {} failed to persist",
            report.recorded,
            report.month,
            report.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::YearMonth;
    use crate::reconcile::{classify, AuthorityPolicy, SyncAction, Drift};
    use crate::wireguard::KeyPair;
    use chrono::Utc;

    fn row(name: Option<&str>, received: u64, sent: u64) -> UsageRow {
        UsageRow {
            public_key: KeyPair::generate().public,
            name: name.map(str::to_string),
            email: name.map(|_| "a@b.com".to_string()),
            month: Some("2024-05".parse::<YearMonth>().unwrap()),
            received,
            sent,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_to_gb() {
        assert_eq!(to_gb(0), 0.0);
        assert_eq!(to_gb(1024 * 1024 * 1024), 1.0);
        assert_eq!(to_gb(1024 * 1024 * 1024 * 3 / 2), 1.5);
        assert_eq!(to_gb(500), 0.0);
    }

    #[test]
    fn test_usage_table() {
        let rows = vec![row(Some("Alice"), 1024 * 1024 * 1024, 0), row(None, 0, 0)];
        let table = usage_table(&rows, false);

        assert!(table.contains("Monthly GB Received"));
        assert!(table.contains("Alice"));
        assert!(table.contains(UNKNOWN));
        assert!(table.contains("1.00"));
        assert!(table.contains("2024-05"));

        // Every line of the grid has the same width
        let widths: Vec<usize> = table.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_usage_json() {
        let rows = vec![row(Some("Alice"), 1024 * 1024 * 1024, 1024 * 1024 * 1024)];
        let json = usage_json(&rows).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed[0]["name"], "Alice");
        assert_eq!(parsed[0]["month"], "2024-05");
        assert_eq!(parsed[0]["total_gb"], 2.0);
        assert_eq!(parsed[0]["received"], 1024 * 1024 * 1024u64);
    }

    #[test]
    fn test_sync_summary_in_sync() {
        let key = KeyPair::generate().public;
        let report = SyncReport {
            policy: AuthorityPolicy::Ledger,
            auto_fix: false,
            classification: classify([&key], [&key]),
            actions: Vec::new(),
            conflicts: Vec::new(),
        };
        let text = sync_summary(&report);
        assert!(text.contains("in sync"));
        assert!(text.contains("1 peers found in both"));
    }

    #[test]
    fn test_sync_summary_with_actions() {
        let key = KeyPair::generate().public;
        let report = SyncReport {
            policy: AuthorityPolicy::Interface,
            auto_fix: false,
            classification: classify(std::iter::empty(), [&key]),
            actions: vec![SyncAction {
                public_key: key.clone(),
                drift: Drift::LedgerOnly,
                remedy: Remedy::RemoveFromLedger,
                outcome: Outcome::Planned,
            }],
            conflicts: Vec::new(),
        };
        let text = sync_summary(&report);
        assert!(text.contains("policy: interface"));
        assert!(text.contains(&key.to_base64()));
        assert!(text.contains("remove from ledger"));
        assert!(text.contains("--fix"));
    }
}
