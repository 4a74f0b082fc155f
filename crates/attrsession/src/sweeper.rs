//! Background deletion of expired session records.
//!
//! Reads already treat expired records as absent, so sweeping only reclaims
//! storage. Each delete is conditional on the `Expires` value the select
//! observed: a record renewed between the select and the delete survives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attributes::{self, EXPIRES};
use crate::backend::{AttributeStore, SelectQuery, UpdateCondition};
use crate::error::Result;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired records the select returned.
    pub scanned: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Records renewed or removed by someone else before the delete.
    pub skipped: usize,
    /// Records whose delete failed with a store error.
    pub failed: usize,
}

/// Deletes expired records under one item-name prefix.
pub struct ExpirySweeper<S> {
    store: Arc<S>,
    prefix: String,
}

impl<S> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
        }
    }
}

impl<S: AttributeStore> ExpirySweeper<S> {
    pub fn new(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Delete every record that has expired by now.
    ///
    /// Fails only when the select fails. Per-record failures are counted.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = attributes::format_timestamp(Utc::now());
        let query = SelectQuery::new(format!("{}-", self.prefix), EXPIRES, now)
            .with_output(&[EXPIRES]);

        let expired = self.store.select(&query, true).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for item in &expired {
            let Some(expires) = item.first(EXPIRES) else {
                report.skipped += 1;
                continue;
            };

            let unchanged = UpdateCondition::equals(EXPIRES, expires);
            match self
                .store
                .delete_attributes(&item.name, Some(&unchanged))
                .await
            {
                Ok(()) => {
                    debug!(item = %item.name, "swept expired record");
                    report.deleted += 1;
                }
                Err(e) if e.is_conflict() || e.is_missing_target() => report.skipped += 1,
                Err(e) => {
                    warn!(item = %item.name, error = %e, "failed to delete expired record");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                prefix = %self.prefix,
                deleted = report.deleted,
                skipped = report.skipped,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }
}

impl<S: AttributeStore + 'static> ExpirySweeper<S> {
    /// Sweep every `interval` on a background task until the handle is
    /// shut down or dropped. The first sweep runs immediately.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(prefix = %self.prefix, error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
            debug!(prefix = %self.prefix, "expiry sweeper stopped");
        });

        SweeperHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the sweeper.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "expiry sweeper task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
