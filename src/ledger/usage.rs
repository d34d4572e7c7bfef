//! Monthly usage operations

use super::model::{
    counter_from_db, counter_to_db, format_timestamp, parse_timestamp, MonthlyUsage, UsageRow,
    YearMonth,
};
use super::Ledger;
use crate::accounting;
use crate::error::{Result, VpnmonError};
use crate::wireguard::{PublicKey, RawSample};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

type UsageRowTuple = (String, String, i64, i64, i64, i64, Option<String>);

type ReportRowTuple = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<String>,
);

fn decode_key(text: &str) -> Result<PublicKey> {
    PublicKey::from_base64(text)
        .map_err(|e| VpnmonError::Storage(format!("Bad public key in ledger: {}", e)))
}

fn decode_month(text: &str) -> Result<YearMonth> {
    text.parse()
        .map_err(|_| VpnmonError::Storage(format!("Bad month '{}' in ledger", text)))
}

fn usage_from_row(row: UsageRowTuple) -> Result<MonthlyUsage> {
    let (key, month, acc_rx, acc_tx, last_rx, last_tx, updated) = row;
    Ok(MonthlyUsage {
        public_key: decode_key(&key)?,
        month: decode_month(&month)?,
        accumulated_received: counter_from_db(acc_rx)?,
        accumulated_sent: counter_from_db(acc_tx)?,
        last_received: counter_from_db(last_rx)?,
        last_sent: counter_from_db(last_tx)?,
        last_updated: match updated {
            Some(text) => parse_timestamp(&text)?,
            None => Utc::now(),
        },
    })
}

fn report_from_row(row: ReportRowTuple) -> Result<UsageRow> {
    let (key, name, email, month, received, sent, updated) = row;
    Ok(UsageRow {
        public_key: decode_key(&key)?,
        name,
        email,
        month: month.as_deref().map(decode_month).transpose()?,
        received: counter_from_db(received)?,
        sent: counter_from_db(sent)?,
        last_updated: match updated {
            Some(text) => parse_timestamp(&text)?,
            None => Utc::now(),
        },
    })
}

async fn fetch_usage(
    conn: &mut SqliteConnection,
    key: &str,
    month: &str,
) -> Result<Option<MonthlyUsage>> {
    let row: Option<UsageRowTuple> = sqlx::query_as(
        "SELECT public_key, year_month, accumulated_received, accumulated_sent,
                last_received, last_sent, last_updated
         FROM monthly_usage WHERE public_key = ? AND year_month = ?",
    )
    .bind(key)
    .bind(month)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(usage_from_row).transpose()
}

async fn fold_and_store(
    conn: &mut SqliteConnection,
    sample: &RawSample,
    month: YearMonth,
) -> Result<MonthlyUsage> {
    let key = sample.public_key.to_base64();
    let month_text = month.to_string();

    // The peer may have been deleted since the caller last listed peers
    let registered: i64 =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM peers WHERE public_key = ?)")
            .bind(&key)
            .fetch_one(&mut *conn)
            .await?;
    if registered == 0 {
        return Err(VpnmonError::NotFound(format!(
            "Peer {} is not registered",
            sample.public_key
        )));
    }

    let prior = fetch_usage(conn, &key, &month_text).await?;
    let next = accounting::fold(prior.as_ref(), sample, month);

    sqlx::query(
        "INSERT INTO monthly_usage
            (public_key, year_month, accumulated_received, accumulated_sent,
             last_received, last_sent, last_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(public_key, year_month) DO UPDATE SET
            accumulated_received = excluded.accumulated_received,
            accumulated_sent = excluded.accumulated_sent,
            last_received = excluded.last_received,
            last_sent = excluded.last_sent,
            last_updated = excluded.last_updated",
    )
    .bind(&key)
    .bind(&month_text)
    .bind(counter_to_db(next.accumulated_received)?)
    .bind(counter_to_db(next.accumulated_sent)?)
    .bind(counter_to_db(next.last_received)?)
    .bind(counter_to_db(next.last_sent)?)
    .bind(format_timestamp(&next.last_updated))
    .execute(&mut *conn)
    .await?;

    Ok(next)
}

impl Ledger {
    /// Fold a raw sample into the peer's row for `month`
    ///
    /// Read, fold and write happen in one `BEGIN IMMEDIATE` transaction, so
    /// concurrent calls for the same peer and month are serialised. Fails
    /// with `NotFound`, writing nothing, when the peer is not registered.
    /// Dropping the future rolls the transaction back.
    #[tracing::instrument(skip(self, sample), fields(public_key = %sample.public_key, %month))]
    pub async fn record_sample(&self, sample: &RawSample, month: YearMonth) -> Result<MonthlyUsage> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let usage = fold_and_store(&mut *tx, sample, month).await?;
        tx.commit().await?;

        debug!(
            "Usage now rx={} tx={}",
            usage.accumulated_received, usage.accumulated_sent
        );
        Ok(usage)
    }

    /// The stored row for one peer and month
    #[tracing::instrument(skip(self), fields(%public_key, %month))]
    pub async fn get_usage(
        &self,
        public_key: &PublicKey,
        month: YearMonth,
    ) -> Result<Option<MonthlyUsage>> {
        let mut conn = self.pool.acquire().await?;
        fetch_usage(&mut conn, &public_key.to_base64(), &month.to_string()).await
    }

    /// Usage rows for reporting
    ///
    /// With `monthly_only`, one row per peer and month, filtered by the
    /// optional peer and month. Otherwise one row per peer summing every
    /// month (up to and including `month` when given). Rows kept after
    /// their peer was deleted are included without name or email.
    #[tracing::instrument(skip(self))]
    pub async fn query_usage(
        &self,
        public_key: Option<&PublicKey>,
        month: Option<YearMonth>,
        monthly_only: bool,
    ) -> Result<Vec<UsageRow>> {
        let key = public_key.map(|k| k.to_base64());
        let month = month.map(|m| m.to_string());

        let sql = if monthly_only {
            "SELECT m.public_key, p.name, p.email, m.year_month,
                    m.accumulated_received, m.accumulated_sent, m.last_updated
             FROM monthly_usage m
             LEFT JOIN peers p ON p.public_key = m.public_key
             WHERE (? IS NULL OR m.public_key = ?)
               AND (? IS NULL OR m.year_month = ?)
             ORDER BY m.year_month DESC, m.public_key"
        } else {
            "SELECT m.public_key, p.name, p.email, NULL,
                    SUM(m.accumulated_received), SUM(m.accumulated_sent), MAX(m.last_updated)
             FROM monthly_usage m
             LEFT JOIN peers p ON p.public_key = m.public_key
             WHERE (? IS NULL OR m.public_key = ?)
               AND (? IS NULL OR m.year_month <= ?)
             GROUP BY m.public_key
             ORDER BY m.public_key"
        };

        let rows: Vec<ReportRowTuple> = sqlx::query_as(sql)
            .bind(&key)
            .bind(&key)
            .bind(&month)
            .bind(&month)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(report_from_row).collect()
    }
}
