use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::PERCENT_100;
use crate::controller::control::RunControl;
use crate::controller::events::{EventBus, PerformanceSnapshot, ProgressUpdate, SiftEvent};
use crate::pool::WorkerPool;
use crate::utils::estimate_remaining_time;

/// Counters the coordinator bumps and the ticker reads.
#[derive(Debug, Default)]
pub struct RunMetrics {
    rows_processed: AtomicUsize,
    duplicates_found: AtomicUsize,
    /// Progress of the current run in [0, 1], stored as f64 bits.
    progress_bits: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rows(&self, rows: usize) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_duplicates(&self, count: usize) {
        self.duplicates_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_progress(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.progress_bits.store(fraction.to_bits(), Ordering::Relaxed);
    }

    pub fn rows_processed(&self) -> usize {
        self.rows_processed.load(Ordering::Relaxed)
    }

    pub fn duplicates_found(&self) -> usize {
        self.duplicates_found.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub fn progress_update(&self, active: Duration) -> ProgressUpdate {
        let progress = self.progress();
        ProgressUpdate {
            percent: progress * PERCENT_100,
            rows_processed: self.rows_processed(),
            duplicates_found: self.duplicates_found(),
            estimated_seconds_remaining: estimate_remaining_time(progress, active),
        }
    }

    pub fn performance_snapshot(
        &self,
        active: Duration,
        memory_usage_fraction: f64,
        pool_utilization: f64,
    ) -> PerformanceSnapshot {
        let seconds = active.as_secs_f64();
        let rows_per_second = if seconds > 0.0 {
            self.rows_processed() as f64 / seconds
        } else {
            0.0
        };
        PerformanceSnapshot {
            rows_per_second,
            memory_usage_fraction,
            pool_utilization,
            elapsed_ms: active.as_millis() as u64,
        }
    }
}

/// Used / total physical memory in [0, 1].
pub fn sample_memory_pressure(system: &mut System) -> f64 {
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return 0.0;
    }
    (system.used_memory() as f64 / total as f64).clamp(0.0, 1.0)
}

/// Publishes progress and performance on a fixed tick while a run is active.
/// Purely observational; the task is aborted on drop.
pub struct TelemetryTicker {
    handle: JoinHandle<()>,
}

impl TelemetryTicker {
    pub fn spawn(
        interval: Duration,
        metrics: Arc<RunMetrics>,
        control: Arc<RunControl>,
        pool: Arc<WorkerPool>,
        events: EventBus,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if control.is_paused() {
                    continue;
                }
                let active = control.active_elapsed();
                let memory = sample_memory_pressure(&mut system);
                let snapshot = metrics.performance_snapshot(active, memory, pool.utilization());
                debug!(
                    "📊 {:.0} rows/s, memory {:.1}%, pool {:.0}%",
                    snapshot.rows_per_second,
                    snapshot.memory_usage_fraction * PERCENT_100,
                    snapshot.pool_utilization * PERCENT_100
                );
                events.publish(SiftEvent::Progress(metrics.progress_update(active)));
                events.publish(SiftEvent::Performance(snapshot));
            }
        });
        Self { handle }
    }
}

impl Drop for TelemetryTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
