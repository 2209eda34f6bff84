//! Scheduler engine: the loop that finds due capsules and delivers them.
//! Uses tokio::interval so it sleeps between checks; ticks run inline in the
//! loop task, so two ticks never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use capsule_core::error::{CapsuleError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::executor::{DeliveryExecutor, DeliveryOutcome};
use crate::store::CapsuleStore;

/// Set while a scheduler loop is running in this process.
static SCHEDULER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// The store could not be queried; nothing was processed.
    pub aborted: bool,
}

/// Drives the executor over due capsules on a fixed interval.
pub struct DeliveryScheduler {
    store: Arc<CapsuleStore>,
    executor: DeliveryExecutor,
}

impl DeliveryScheduler {
    pub fn new(store: Arc<CapsuleStore>, executor: DeliveryExecutor) -> Self {
        Self { store, executor }
    }

    /// One scan-and-deliver pass. `now` is captured once by the caller and
    /// used for every due comparison in the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let due = match self.store.find_due(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Scheduler tick skipped, store unavailable: {e}");
                return TickReport {
                    aborted: true,
                    ..Default::default()
                };
            }
        };

        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            tracing::debug!("No due capsules at {}", now.to_rfc3339());
            return report;
        }

        tracing::info!("🔔 Found {} pending/failed capsule(s) to process", due.len());
        for capsule in &due {
            match self.executor.execute(capsule).await {
                DeliveryOutcome::Sent => report.sent += 1,
                DeliveryOutcome::Failed(_) => report.failed += 1,
            }
        }
        report
    }

    /// Spawn the loop as a background tokio task. Only one loop may run per
    /// process; a second call fails with [`CapsuleError::SchedulerRunning`]
    /// until the first handle is stopped.
    pub fn start(self: Arc<Self>, every: Duration) -> Result<SchedulerHandle> {
        if every.is_zero() {
            return Err(CapsuleError::Config(
                "scheduler interval must be greater than zero".into(),
            ));
        }
        if SCHEDULER_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CapsuleError::SchedulerRunning);
        }
        let guard = ActiveGuard;

        let stop = Arc::new(Notify::new());
        let stop_rx = stop.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            tracing::info!("⏰ Scheduler started (check every {}s)", every.as_secs());

            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.notified() => {
                        tracing::info!("Scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.tick(Utc::now()).await;
                        if report.due > 0 {
                            tracing::info!(
                                "📣 Tick done: {} due, {} sent, {} failed",
                                report.due,
                                report.sent,
                                report.failed
                            );
                        }
                    }
                }
            }
        });

        Ok(SchedulerHandle { stop, task })
    }
}

/// Clears [`SCHEDULER_ACTIVE`] when the loop task ends, however it ends.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        SCHEDULER_ACTIVE.store(false, Ordering::Release);
    }
}

/// Handle to the running scheduler loop.
pub struct SchedulerHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight tick, if any, to finish.
    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!("⚠️ Scheduler task ended abnormally: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
