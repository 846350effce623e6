use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::controller::phase::Phase;
use crate::matcher::DuplicateResult;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub rows_processed: usize,
    pub duplicates_found: usize,
    pub estimated_seconds_remaining: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub rows_per_second: f64,
    pub memory_usage_fraction: f64,
    pub pool_utilization: f64,
    pub elapsed_ms: u64,
}

/// Outcome of one `run()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub phase: Phase,
    pub files_processed: usize,
    pub rows_processed: usize,
    pub duplicates_found: usize,
    pub total_results: usize,
    pub stopped: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub enum SiftEvent {
    PhaseChanged(Phase),
    Progress(ProgressUpdate),
    Performance(PerformanceSnapshot),
    /// Full result list after each batch that appended something, and after
    /// a phase-3 pass.
    Results(Arc<Vec<DuplicateResult>>),
    FilterDebug(String),
    Error(String),
    RunFinished(RunSummary),
}

/// Fan-out to any number of observers. Publishing never blocks; slow
/// observers lag and lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SiftEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SiftEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SiftEvent) {
        if self.sender.send(event).is_err() {
            debug!("No observers for event");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
