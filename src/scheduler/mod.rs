//! Periodic collector
//!
//! Runs a collection pass every interval until shutdown. A failed pass is
//! logged and counted; the next tick runs regardless.

use crate::error::Result;
use crate::ledger::YearMonth;
use crate::reconcile::{CollectionReport, Reconciler};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters kept across the scheduler's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Passes started
    pub ticks: u64,
    /// Passes that failed outright
    pub failed_ticks: u64,
    /// Samples stored
    pub samples_recorded: u64,
    /// Samples that failed to persist
    pub sample_failures: u64,
    /// Most recent error, if any
    pub last_error: Option<String>,
}

/// Drives the reconciler's collection pass on a timer
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    period: Duration,
    report_drift: bool,
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(reconciler: Arc<Reconciler>, period: Duration) -> Self {
        Self {
            reconciler,
            period,
            report_drift: false,
        }
    }

    /// Also log a report-only reconciliation after each pass
    pub fn with_drift_report(mut self, enabled: bool) -> Self {
        self.report_drift = enabled;
        self
    }

    /// Run one collection pass for the current month
    pub async fn tick(&self) -> Result<CollectionReport> {
        let report = self.reconciler.collect(YearMonth::current()).await?;

        if self.report_drift {
            match self.reconciler.run(false).await {
                Ok(sync) if !sync.classification.is_in_sync() || !sync.conflicts.is_empty() => {
                    warn!(
                        "Drift detected: {} live only, {} ledger only, {} conflicts",
                        sync.classification.live_only.len(),
                        sync.classification.ledger_only.len(),
                        sync.conflicts.len()
                    );
                }
                Ok(_) => debug!("Interface and ledger are in sync"),
                Err(e) => warn!("Drift check failed: {}", e),
            }
        }

        Ok(report)
    }

    /// Tick until `shutdown` resolves, returning the accumulated counters
    ///
    /// The first pass runs immediately.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = SchedulerStats::default();
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Scheduler started, collecting every {:?}", self.period);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping after {} ticks", stats.ticks);
                    break;
                }
                _ = timer.tick() => {
                    stats.ticks += 1;
                    match self.tick().await {
                        Ok(report) => {
                            stats.samples_recorded += report.recorded as u64;
                            stats.sample_failures += report.failures.len() as u64;
                            if let Some(failure) = report.failures.last() {
                                stats.last_error = Some(failure.error.clone());
                            }
                        }
                        Err(e) => {
                            error!("Collection pass failed: {}", e);
                            stats.failed_ticks += 1;
                            stats.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }

        stats
    }
}
