//! The Monitor: crash report job scheduler and fleet coordinator.
//!
//! Keeps incoming crash artifacts flowing into the job store as balanced
//! job rows, recovers work orphaned by dead processors, services the
//! priority lane, and reclaims finished rows - indefinitely, until
//! cancelled.
//!
//! # Architecture
//!
//! Three independent loops share one cancellation token and one job
//! store handle (and through it, one connection pool):
//!
//! - **standard**: dead-processor sweep, then balanced assignment of
//!   newly discovered artifacts (default every 5 minutes)
//! - **priority**: resolves operator-requested expedited artifacts
//!   (default every minute)
//! - **cleanup**: deletes job rows with a terminal outcome (default
//!   every 5 minutes)
//!
//! Any loop hitting the fleet-fatal condition (zero live processors)
//! cancels the shared token; all loops wind down and `run` returns the
//! error. Transient datastore errors abandon the tick and are retried at
//! the next interval.

pub mod cursor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::crashstore::{CrashStorage, CrashStoreError};
use crate::store::{JobPriority, JobStore, StoreError};

pub use cursor::{BalancedCursor, OwnerCursor, RoundRobinCursor};

/// Errors that can occur while scheduling.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No live processor exists to own new work. Fatal: the scheduler
    /// stops and operator intervention is required before restart.
    #[error("No live processors registered to accept work")]
    NoLiveProcessors,

    /// Job store failure. Transient at the tick level.
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    /// Crash store failure. Aborts the enumerating pass only.
    #[error("Crash store error: {0}")]
    CrashStore(#[from] CrashStoreError),
}

impl MonitorError {
    /// Whether this error stops the whole scheduler rather than one tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::NoLiveProcessors)
    }
}

/// One pass body, run by the periodic tick driver.
type PassFn = for<'a> fn(&'a Monitor) -> BoxFuture<'a, Result<(), MonitorError>>;

/// Crash report job scheduler.
pub struct Monitor {
    store: Arc<dyn JobStore>,
    crashes: Arc<dyn CrashStorage>,
    config: MonitorConfig,
    shutdown: CancellationToken,
    fleet_lost: AtomicBool,
}

impl Monitor {
    /// Creates a new monitor.
    ///
    /// `shutdown` is the shared cancellation token; cancelling it (from a
    /// signal handler or another component) winds all three loops down.
    pub fn new(
        store: Arc<dyn JobStore>,
        crashes: Arc<dyn CrashStorage>,
        config: MonitorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            crashes,
            config,
            shutdown,
            fleet_lost: AtomicBool::new(false),
        }
    }

    /// Returns the shutdown token shared by the loops.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Runs the scheduler until cancellation or a fatal condition.
    ///
    /// The priority and cleanup loops run as spawned tasks; the standard
    /// allocation loop runs on the calling task. All loops are joined
    /// before this returns.
    pub async fn run(self: Arc<Self>) -> Result<(), MonitorError> {
        info!(
            standard_delay = ?self.config.standard_loop_delay,
            priority_delay = ?self.config.priority_loop_delay,
            cleanup_delay = ?self.config.cleanup_loop_delay,
            "Monitor starting"
        );

        let priority_handle = tokio::spawn({
            let monitor = Arc::clone(&self);
            async move {
                let delay = monitor.config.priority_loop_delay;
                monitor.tick_loop("priority", delay, priority_pass).await;
            }
        });
        let cleanup_handle = tokio::spawn({
            let monitor = Arc::clone(&self);
            async move {
                let delay = monitor.config.cleanup_loop_delay;
                monitor.tick_loop("cleanup", delay, cleanup_pass).await;
            }
        });

        self.tick_loop("standard", self.config.standard_loop_delay, standard_pass)
            .await;

        // The standard loop is down (cancelled or fatal); make sure the
        // spawned loops follow, then rejoin them.
        self.shutdown.cancel();
        for (name, handle) in [("priority", priority_handle), ("cleanup", cleanup_handle)] {
            if let Err(e) = handle.await {
                error!(loop_name = name, error = %e, "Loop task panicked");
            }
        }

        if self.fleet_lost.load(Ordering::SeqCst) {
            error!("Monitor stopped: no live processors");
            Err(MonitorError::NoLiveProcessors)
        } else {
            info!("Monitor stopped");
            Ok(())
        }
    }

    /// Cancellable periodic tick driver shared by the three loops.
    ///
    /// Runs `pass`, classifies its result (fatal errors cancel the shared
    /// token; transient errors are logged and retried next tick), then
    /// sleeps for `interval` unless cancelled first.
    async fn tick_loop(&self, name: &'static str, interval: Duration, pass: PassFn) {
        info!(loop_name = name, ?interval, "Loop starting");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match pass(self).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(loop_name = name, error = %e, "Fatal condition, stopping monitor");
                    self.fleet_lost.store(true, Ordering::SeqCst);
                    self.shutdown.cancel();
                    break;
                }
                Err(e) => {
                    warn!(loop_name = name, error = %e, "Pass failed, retrying next tick");
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(loop_name = name, "Loop stopped");
    }

    /// One standard allocation pass: sweep dead processors, then assign
    /// every newly discovered artifact to a cursor-selected owner.
    ///
    /// Public so operators (and tests) can drive single passes; `run`
    /// calls this on a timer.
    pub async fn run_standard_pass(&self) -> Result<(), MonitorError> {
        let threshold = self.config.dead_processor_threshold(Utc::now());
        self.sweep_dead_processors(threshold).await?;
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let loads = self.store.processor_loads(threshold).await?;
        let mut cursor = BalancedCursor::new(loads)?;

        debug!("beginning crash store scan");
        let mut new_crashes = self.crashes.new_crashes();
        while let Some(next) = new_crashes.next().await {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            // A failing scan aborts the pass; the next tick retries.
            let uuid = next?;
            let owner = cursor.next_owner();
            match self
                .store
                .insert_job(&uuid, owner, JobPriority::Normal)
                .await
            {
                Ok(()) => debug!(uuid = %uuid, processor_id = owner, "Job queued"),
                Err(e) => {
                    warn!(uuid = %uuid, processor_id = owner, error = %e, "Failed to queue job, skipping")
                }
            }
        }
        debug!("crash store scan finished");
        Ok(())
    }

    /// Finds dead processors, redistributes their work to live ones and
    /// deletes them.
    ///
    /// The queued-time range of the orphaned jobs is split into equal
    /// slices, one per live processor. The split is an approximation
    /// (even in time, not load-aware); correctness only needs eventual
    /// ownership by a live processor.
    async fn sweep_dead_processors(&self, threshold: DateTime<Utc>) -> Result<(), MonitorError> {
        debug!(%threshold, "looking for dead processors");
        let dead = self.store.dead_processors(threshold).await?;
        if dead.is_empty() {
            return Ok(());
        }
        info!(dead = ?dead, "Found dead processor(s)");

        let live = self.store.live_processors(threshold).await?;
        if live.is_empty() {
            return Err(MonitorError::NoLiveProcessors);
        }

        if let Some((earliest, latest)) = self.store.queued_range(&dead).await? {
            let slices = partition_range(earliest, latest, live.len());
            for ((lo, hi), &owner) in slices.iter().zip(live.iter()) {
                let moved = self
                    .store
                    .reassign_jobs_in_range(&dead, *lo, *hi, owner)
                    .await?;
                if moved > 0 {
                    info!(processor_id = owner, moved, lo = %lo, hi = %hi, "Reassigned orphaned jobs");
                }
            }
        }

        for &processor in &dead {
            match self.store.requeue_priority_claims(processor).await {
                Ok(n) if n > 0 => {
                    info!(processor_id = processor, requeued = n, "Requeued priority claims")
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(processor_id = processor, error = %e, "Failed to requeue priority claims")
                }
            }
        }

        self.store.delete_processors(&dead).await?;
        info!(removed = dead.len(), "Removed dead processors");
        Ok(())
    }

    /// One priority pass: resolve every pending priority request.
    ///
    /// Per-request failures are isolated; the round-robin cursor is built
    /// lazily, only when a request actually needs a fresh owner.
    pub async fn run_priority_pass(&self) -> Result<(), MonitorError> {
        let pending = self.store.pending_priority_requests().await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(pending = pending.len(), "Servicing priority requests");

        let threshold = self.config.dead_processor_threshold(Utc::now());
        let mut cursor: Option<RoundRobinCursor> = None;
        for uuid in pending {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self
                .resolve_priority_request(&uuid, threshold, &mut cursor)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(uuid = %uuid, error = %e, "Failed to resolve priority request, retrying next pass")
                }
            }
        }
        Ok(())
    }

    /// Resolves one priority request: already queued, in the crash store,
    /// or nowhere (dropped as unresolvable).
    async fn resolve_priority_request(
        &self,
        uuid: &str,
        threshold: DateTime<Utc>,
        cursor: &mut Option<RoundRobinCursor>,
    ) -> Result<(), MonitorError> {
        if let Some(owner) = self.store.job_owner(uuid).await? {
            if self.store.add_priority_claim(owner, uuid).await? {
                info!(uuid = %uuid, processor_id = owner, "Priority request already queued");
                self.store.delete_priority_request(uuid).await?;
            } else {
                // Owner is dead; the sweep will reassign the job. Leave
                // the request for the next pass.
                debug!(uuid = %uuid, processor_id = owner, "Owner is dead, deferring");
            }
            return Ok(());
        }

        if self.crashes.contains(uuid).await? {
            let cur = match cursor {
                Some(c) => c,
                None => {
                    let live = self.store.live_processors(threshold).await?;
                    cursor.insert(RoundRobinCursor::new(live)?)
                }
            };
            let owner = cur.next_owner();
            self.store
                .insert_job(uuid, owner, JobPriority::Elevated)
                .await?;
            if !self.store.add_priority_claim(owner, uuid).await? {
                warn!(uuid = %uuid, processor_id = owner, "Owner vanished before claim was recorded");
            }
            self.store.delete_priority_request(uuid).await?;
            info!(uuid = %uuid, processor_id = owner, "Priority job queued");
            return Ok(());
        }

        // Not in the queue, not in storage: the artifact may never
        // arrive. Priority requests are not retried indefinitely.
        error!(uuid = %uuid, "Priority request was never found, dropping");
        self.store.delete_priority_request(uuid).await?;
        Ok(())
    }

    /// One cleanup pass: delete every job row with a terminal outcome.
    pub async fn run_cleanup_pass(&self) -> Result<(), MonitorError> {
        debug!("dealing with completed and failed jobs");
        let deleted = self.store.delete_completed_jobs().await?;
        if deleted > 0 {
            info!(deleted, "Reclaimed finished jobs");
        }
        Ok(())
    }
}

fn standard_pass(monitor: &Monitor) -> BoxFuture<'_, Result<(), MonitorError>> {
    Box::pin(monitor.run_standard_pass())
}

fn priority_pass(monitor: &Monitor) -> BoxFuture<'_, Result<(), MonitorError>> {
    Box::pin(monitor.run_priority_pass())
}

fn cleanup_pass(monitor: &Monitor) -> BoxFuture<'_, Result<(), MonitorError>> {
    Box::pin(monitor.run_cleanup_pass())
}

/// Splits `[earliest, latest]` into `slices` equal-width sub-ranges,
/// inclusive at both ends.
///
/// Adjacent slices share a boundary instant; a job queued exactly on a
/// boundary may be moved twice, which is harmless. The final slice ends
/// exactly at `latest` so no job falls through integer rounding.
pub(crate) fn partition_range(
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
    slices: usize,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let n = slices.max(1);
    let step = (latest - earliest) / n as i32;
    let mut out = Vec::with_capacity(n);
    for k in 0..n {
        let lo = earliest + step * k as i32;
        let hi = if k == n - 1 {
            latest
        } else {
            earliest + step * (k as i32 + 1)
        };
        out.push((lo, hi));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_partition_range_covers_whole_range() {
        let earliest = Utc::now();
        let latest = earliest + ChronoDuration::minutes(90);
        let slices = partition_range(earliest, latest, 3);

        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].0, earliest);
        assert_eq!(slices[2].1, latest);
        // adjacent slices meet exactly
        assert_eq!(slices[0].1, slices[1].0);
        assert_eq!(slices[1].1, slices[2].0);
    }

    #[test]
    fn test_partition_range_single_slice() {
        let earliest = Utc::now();
        let latest = earliest + ChronoDuration::hours(1);
        let slices = partition_range(earliest, latest, 1);
        assert_eq!(slices, vec![(earliest, latest)]);
    }

    #[test]
    fn test_partition_range_zero_width() {
        let instant = Utc::now();
        let slices = partition_range(instant, instant, 4);
        assert_eq!(slices.len(), 4);
        for (lo, hi) in slices {
            assert_eq!(lo, instant);
            assert_eq!(hi, instant);
        }
    }

    #[test]
    fn test_partition_range_last_slice_absorbs_rounding() {
        let earliest = Utc::now();
        // 100ms split 3 ways does not divide evenly
        let latest = earliest + ChronoDuration::milliseconds(100);
        let slices = partition_range(earliest, latest, 3);
        assert_eq!(slices.last().unwrap().1, latest);
    }

    #[test]
    fn test_monitor_error_fatality() {
        assert!(MonitorError::NoLiveProcessors.is_fatal());
        let transient = MonitorError::Store(crate::store::StoreError::ConnectionFailed(
            "down".to_string(),
        ));
        assert!(!transient.is_fatal());
    }
}
