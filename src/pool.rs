//! Bounded pool of execution units with FIFO-fair acquisition.
//!
//! Each unit is a single-threaded rayon pool, so units run in parallel with
//! each other and with the async coordinator. Slots are addressed by index.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Result, SiftError};

/// Grants exclusive use of one unit until released.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotHandle {
    index: usize,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

struct PoolState {
    busy: Vec<bool>,
    waiters: VecDeque<oneshot::Sender<SlotHandle>>,
    units: Vec<rayon::ThreadPool>,
    closed: bool,
}

pub struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
    size: usize,
}

enum Acquisition {
    Ready(Result<SlotHandle>),
    Queued(PendingSlot),
}

/// A queued request. If it is dropped after a releaser already handed it a
/// slot, the slot goes back to the pool instead of dying in the channel.
struct PendingSlot {
    state: Arc<Mutex<PoolState>>,
    rx: Option<oneshot::Receiver<SlotHandle>>,
}

impl PendingSlot {
    async fn wait(mut self) -> Result<SlotHandle> {
        let received = match self.rx.as_mut() {
            Some(rx) => rx.await.map_err(|_| SiftError::PoolClosed),
            None => Err(SiftError::PoolClosed),
        };
        self.rx = None;
        received
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(handle) = rx.try_recv() {
                debug!("Returning slot {} from a cancelled request", handle.index);
                release_slot(&self.state, handle);
            }
        }
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut units = Vec::with_capacity(size);
        for unit in 0..size {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(1)
                .thread_name(move |_| format!("sift-unit-{}", unit))
                .panic_handler(move |_| warn!("⚠️ Job panicked on unit {}", unit))
                .build()
                .map_err(|e| SiftError::WorkerFailed(e.to_string()))?;
            units.push(pool);
        }

        info!("🔧 Worker pool started with {} units", size);

        Ok(Self {
            state: Arc::new(Mutex::new(PoolState {
                busy: vec![false; size],
                waiters: VecDeque::new(),
                units,
                closed: false,
            })),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Claims an idle unit, or queues the request. The request joins the
    /// queue when this is called, not when the future is first polled.
    pub fn acquire(&self) -> impl Future<Output = Result<SlotHandle>> + Send + 'static {
        let acquisition = {
            let mut state = self.state.lock();
            if state.closed {
                Acquisition::Ready(Err(SiftError::PoolClosed))
            } else if let Some(index) = state.busy.iter().position(|busy| !busy) {
                state.busy[index] = true;
                Acquisition::Ready(Ok(SlotHandle { index }))
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Acquisition::Queued(PendingSlot {
                    state: Arc::clone(&self.state),
                    rx: Some(rx),
                })
            }
        };

        async move {
            match acquisition {
                Acquisition::Ready(result) => result,
                Acquisition::Queued(pending) => pending.wait().await,
            }
        }
    }

    /// Hands the unit straight to the oldest live waiter, or marks it idle.
    pub fn release(&self, handle: SlotHandle) {
        release_slot(&self.state, handle);
    }

    /// Runs `job` on the unit held by `handle`. The caller keeps the handle
    /// and must not release it before this resolves.
    pub async fn execute<F, T>(&self, handle: &SlotHandle, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let state = self.state.lock();
            let unit = state.units.get(handle.index).ok_or(SiftError::PoolClosed)?;
            unit.spawn(move || {
                let _ = tx.send(job());
            });
        }
        rx.await
            .map_err(|_| SiftError::WorkerFailed(format!("unit {} dropped its job", handle.index)))
    }

    /// Acquire, execute, release. The slot travels with the job and is
    /// released when the job finishes on its unit, so a caller that stops
    /// awaiting neither leaks the slot nor frees it while the unit is busy.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.acquire().await?;
        let index = handle.index;
        let slot = SlotGuard {
            state: Arc::clone(&self.state),
            handle: Some(handle),
        };
        let (tx, rx) = oneshot::channel();
        let task = move || {
            let slot = slot;
            let value = job();
            // Free the unit before waking the caller.
            drop(slot);
            let _ = tx.send(value);
        };

        let unspawned = {
            let state = self.state.lock();
            match state.units.get(index) {
                Some(unit) => {
                    unit.spawn(task);
                    None
                }
                None => Some(task),
            }
        };
        // Dropped outside the lock: the guard takes it again.
        if let Some(task) = unspawned {
            drop(task);
            return Err(SiftError::PoolClosed);
        }

        rx.await
            .map_err(|_| SiftError::WorkerFailed(format!("unit {} dropped its job", index)))
    }

    /// Busy units over total units.
    pub fn utilization(&self) -> f64 {
        let state = self.state.lock();
        if state.busy.is_empty() {
            return 0.0;
        }
        let busy = state.busy.iter().filter(|b| **b).count();
        busy as f64 / state.busy.len() as f64
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Stops every unit and rejects queued requests with `PoolClosed`.
    pub fn shutdown(&self) {
        let (units, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.busy.clear();
            (
                std::mem::take(&mut state.units),
                std::mem::take(&mut state.waiters),
            )
        };
        let rejected = waiters.len();
        // Dropping the senders resolves every queued receiver with an error.
        drop(waiters);
        drop(units);
        info!("🛑 Worker pool shut down ({} queued requests rejected)", rejected);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn release_slot(state: &Mutex<PoolState>, handle: SlotHandle) {
    let mut state = state.lock();
    if state.closed {
        return;
    }
    let mut handle = handle;
    while let Some(waiter) = state.waiters.pop_front() {
        match waiter.send(handle) {
            Ok(()) => return,
            // Requester went away; try the next one.
            Err(returned) => handle = returned,
        }
    }
    if let Some(busy) = state.busy.get_mut(handle.index) {
        *busy = false;
    } else {
        debug!("Released unknown slot {}", handle.index);
    }
}

struct SlotGuard {
    state: Arc<Mutex<PoolState>>,
    handle: Option<SlotHandle>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            release_slot(&self.state, handle);
        }
    }
}
