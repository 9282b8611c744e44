//! Update scheduler: one periodic task per active source.
//!
//! Each task sleeps for its source's update interval, re-checks the
//! cancellation token, then advances the source through the registry.
//! Tasks share nothing but the registry handle and the token.
//!
//! Sleeps are deadline-based (`sleep_until`), so a wake-up that is not
//! the deadline never restarts the full interval.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A registry error ends only the task that hit it

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tsim_core::SourceId;

use crate::registry::{RegistryError, SourcePlan, SourceRegistry};

/// Why an updater task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdaterExit {
    Cancelled,
    Failed(RegistryError),
    Panicked,
}

/// Outcome of one updater task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterReport {
    pub id: SourceId,
    pub updates: u64,
    pub exit: UpdaterExit,
}

/// Handles of every running updater task.
#[derive(Debug)]
pub struct UpdaterSet {
    handles: Vec<(SourceId, JoinHandle<UpdaterReport>)>,
}

impl UpdaterSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every task to finish.
    ///
    /// Call after cancelling the token; the registry may be released once
    /// this returns.
    pub async fn join(self) -> Vec<UpdaterReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for (id, handle) in self.handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(source_id = %id, error = %e, "Updater task panicked");
                    UpdaterReport {
                        id,
                        updates: 0,
                        exit: UpdaterExit::Panicked,
                    }
                }
            };
            reports.push(report);
        }
        debug!(tasks = reports.len(), "All updater tasks joined");
        reports
    }
}

/// Spawns one updater per source that is active at startup.
///
/// Must be called from within a tokio runtime.
pub fn spawn_updaters(
    registry: Arc<SourceRegistry>,
    cancel_token: CancellationToken,
) -> Result<UpdaterSet, RegistryError> {
    let plan = registry.plan()?;

    let handles: Vec<_> = plan
        .into_iter()
        .filter(|p| p.active)
        .map(|p| {
            let task = run_updater(Arc::clone(&registry), p, cancel_token.clone());
            (p.id, tokio::spawn(task))
        })
        .collect();

    info!(
        tasks = handles.len(),
        sources = registry.len(),
        "Update scheduler started"
    );
    Ok(UpdaterSet { handles })
}

async fn run_updater(
    registry: Arc<SourceRegistry>,
    plan: SourcePlan,
    cancel_token: CancellationToken,
) -> UpdaterReport {
    let mut updates = 0u64;
    debug!(
        source_id = %plan.id,
        kind = %plan.kind,
        interval_ms = plan.interval.as_millis() as u64,
        "Updater started"
    );

    let mut deadline = Instant::now() + plan.interval;
    let exit = loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => break UpdaterExit::Cancelled,
            _ = sleep_until(deadline) => {}
        }

        if cancel_token.is_cancelled() {
            break UpdaterExit::Cancelled;
        }
        deadline = next_deadline(deadline, plan.interval, Instant::now());

        match registry.update(plan.index) {
            Ok(Some(reading)) => {
                updates += 1;
                trace!(source_id = %plan.id, reading = %reading, "Source updated");
            }
            // Deactivated at runtime; keep the cadence in case it returns.
            Ok(None) => {}
            Err(e) => {
                warn!(source_id = %plan.id, error = %e, "Updater stopping on registry error");
                break UpdaterExit::Failed(e);
            }
        }
    };

    debug!(source_id = %plan.id, updates, "Updater stopped");
    UpdaterReport {
        id: plan.id,
        updates,
        exit,
    }
}

/// Next wake-up after the one due at `due`.
///
/// A late wake-up keeps the cadence; ticks missed entirely are skipped.
fn next_deadline(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = due + interval;
    if next > now {
        next
    } else {
        now + interval
    }
}
