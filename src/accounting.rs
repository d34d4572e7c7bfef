//! Usage accountant
//!
//! Folds a raw counter sample into a peer's monthly usage row. The first
//! sample of a month only sets the baseline. After that each counter adds
//! the difference to its previous raw value, or the whole raw value when
//! the counter went backwards, which means the interface restarted or the
//! peer was re-added and the counter began again from zero.
//!
//! Traffic between the last sample before a reset and the reset itself is
//! not seen, and a counter is assumed never to wrap within one sampling
//! interval.
//!
//! Totals saturate at `u64::MAX`. The ledger stores counters in signed
//! 64-bit columns and refuses any raw or accumulated value above
//! `i64::MAX` (about 9.2 EB) with `ConstraintViolation`, so that ceiling
//! is the effective limit for a single peer and month.

use crate::ledger::{MonthlyUsage, YearMonth};
use crate::wireguard::RawSample;
use tracing::warn;

/// Bytes to add for one counter moving from `last` to `raw`
pub fn counter_delta(last: u64, raw: u64) -> u64 {
    if raw >= last {
        raw - last
    } else {
        raw
    }
}

/// Compute the row that results from applying `sample` to `prior`
///
/// `prior` must belong to the same peer and `month`; anything else is
/// treated as a first observation.
pub fn fold(prior: Option<&MonthlyUsage>, sample: &RawSample, month: YearMonth) -> MonthlyUsage {
    let prior = prior.filter(|p| p.month == month && p.public_key == sample.public_key);

    let (accumulated_received, accumulated_sent) = match prior {
        None => (0, 0),
        Some(p) => {
            if sample.received < p.last_received || sample.sent < p.last_sent {
                warn!(
                    "Counter reset detected for {} (rx {} -> {}, tx {} -> {})",
                    sample.public_key, p.last_received, sample.received, p.last_sent, sample.sent
                );
            }
            (
                p.accumulated_received
                    .saturating_add(counter_delta(p.last_received, sample.received)),
                p.accumulated_sent
                    .saturating_add(counter_delta(p.last_sent, sample.sent)),
            )
        }
    };

    MonthlyUsage {
        public_key: sample.public_key.clone(),
        month,
        accumulated_received,
        accumulated_sent,
        last_received: sample.received,
        last_sent: sample.sent,
        last_updated: sample.observed_at,
    }
}
