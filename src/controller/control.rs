use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug)]
struct Clock {
    started_at: Instant,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

/// Pause/resume/stop shared between the coordinator and whoever drives it.
/// Also keeps the pause-aware run clock.
#[derive(Debug)]
pub struct RunControl {
    paused: AtomicBool,
    stop_requested: AtomicBool,
    resumed: Notify,
    clock: Mutex<Clock>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            resumed: Notify::new(),
            clock: Mutex::new(Clock {
                started_at: Instant::now(),
                paused_since: None,
                paused_total: Duration::ZERO,
            }),
        }
    }

    /// Clears a pending stop and restarts the clock for a new run. A pause
    /// requested before the run stays in effect.
    pub fn reset(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        let now = Instant::now();
        let mut clock = self.clock.lock();
        clock.started_at = now;
        clock.paused_total = Duration::ZERO;
        clock.paused_since = self.is_paused().then_some(now);
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.clock.lock().paused_since = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            let mut clock = self.clock.lock();
            if let Some(since) = clock.paused_since.take() {
                clock.paused_total += since.elapsed();
            }
        }
        self.resumed.notify_waiters();
    }

    /// Cooperative: observed before the next batch. Also releases a paused
    /// loop so it can see the request.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Blocks while paused. Returns early when a stop is requested.
    pub async fn wait_while_paused(&self) {
        loop {
            let resumed = self.resumed.notified();
            tokio::pin!(resumed);
            // Register before checking the flags so a resume in between is not lost.
            resumed.as_mut().enable();
            if !self.is_paused() || self.stop_requested() {
                return;
            }
            resumed.await;
        }
    }

    /// Wall time since the run started, minus time spent paused.
    pub fn active_elapsed(&self) -> Duration {
        let clock = self.clock.lock();
        let mut paused = clock.paused_total;
        if let Some(since) = clock.paused_since {
            paused += since.elapsed();
        }
        clock.started_at.elapsed().saturating_sub(paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_running() {
        let control = RunControl::new();
        tokio::time::timeout(Duration::from_millis(100), control.wait_while_paused())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let control = Arc::new(RunControl::new());
        control.pause();

        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_paused_loop() {
        let control = Arc::new(RunControl::new());
        control.pause();
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        control.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(control.stop_requested());
    }

    #[test]
    fn test_paused_time_excluded() {
        let control = RunControl::new();
        control.pause();
        std::thread::sleep(Duration::from_millis(50));
        let during_pause = control.active_elapsed();
        control.resume();
        assert!(during_pause < Duration::from_millis(40));

        control.stop();
        control.pause();
        control.reset();
        assert!(control.is_paused());
        assert!(!control.stop_requested());
    }
}
