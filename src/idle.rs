//! Idle monitor: forces logout after a period without user interaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Interaction signals that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerMove,
    Click,
    KeyPress,
    Scroll,
    Touch,
    VisibilityChange,
}

/// Instant of the last observed user activity.
#[derive(Debug)]
pub struct IdleClock {
    last_activity: Mutex<Instant>,
}

impl Default for IdleClock {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleClock {
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Reset the clock; every activity kind counts the same.
    pub fn record(&self, kind: ActivityKind) {
        tracing::trace!(?kind, "Activity");
        self.reset();
    }

    pub fn reset(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Called once when the idle bound is reached.
pub type OnIdleFn = Arc<dyn Fn() + Send + Sync>;

/// Background check of an [`IdleClock`] against an idle bound.
///
/// The check task is released on [`IdleMonitor::stop`] and on drop.
pub struct IdleMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl IdleMonitor {
    /// Start checking `clock` every `check_interval`; `on_idle` runs once when
    /// the clock has been idle for `idle_timeout`, after which the monitor stops.
    pub fn start(
        clock: Arc<IdleClock>,
        idle_timeout: Duration,
        check_interval: Duration,
        on_idle: OnIdleFn,
    ) -> Self {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_token = token.clone();
        let task_fired = fired.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(
                idle_timeout_secs = idle_timeout.as_secs(),
                "Idle monitor started"
            );

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        tracing::debug!("Idle monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let idle = clock.idle_for();
                        if idle >= idle_timeout {
                            tracing::warn!(idle_secs = idle.as_secs(), "Idle bound reached");
                            task_fired.store(true, Ordering::SeqCst);
                            on_idle();
                            break;
                        }
                    }
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
            fired,
        }
    }

    /// Stop the check task. Idempotent.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_hook() -> (OnIdleFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let hook: OnIdleFn = Arc::new(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        (hook, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_bound() {
        let clock = Arc::new(IdleClock::new());
        let (hook, count) = counter_hook();
        let monitor = IdleMonitor::start(
            clock,
            Duration::from_secs(300),
            Duration::from_secs(1),
            hook,
        );

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(monitor.has_fired());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_clock() {
        let clock = Arc::new(IdleClock::new());
        let (hook, count) = counter_hook();
        let _monitor = IdleMonitor::start(
            clock.clone(),
            Duration::from_secs(300),
            Duration::from_secs(1),
            hook,
        );

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(200)).await;
            clock.record(ActivityKind::KeyPress);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_task() {
        let clock = Arc::new(IdleClock::new());
        let (hook, count) = counter_hook();
        let mut monitor = IdleMonitor::start(
            clock,
            Duration::from_secs(300),
            Duration::from_secs(1),
            hook,
        );
        assert!(monitor.is_running());

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_running());
    }
}
