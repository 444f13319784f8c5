//! Coalescing delayed trigger

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

struct Window {
    /// Soft deadline: pushed forward by each call
    deadline: Instant,
    /// Hard deadline: fixed at the first call of the window
    hard_deadline: Instant,
}

/// A one-shot scheduled action that absorbs repeated requests.
///
/// Calling [`execute_with_delay`](Self::execute_with_delay) ensures the
/// action fires after at least `min_delay` and at most `max_delay` from the
/// first call of the current pending window. Calls arriving while a window is
/// pending push the soft deadline forward but never past the hard deadline,
/// so a steady stream of requests still fires periodically.
pub struct CoalescingDelayedTrigger {
    min_delay: Duration,
    max_delay: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
    window: Arc<Mutex<Option<Window>>>,
    rearm: Arc<Notify>,
    tracker: TaskTracker,
}

impl CoalescingDelayedTrigger {
    /// Create a trigger running `action` on the given delays.
    ///
    /// `min_delay` must not exceed `max_delay`.
    pub fn new(
        min_delay: Duration,
        max_delay: Duration,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(min_delay <= max_delay);
        Self {
            min_delay,
            max_delay,
            action: Arc::new(action),
            window: Arc::new(Mutex::new(None)),
            rearm: Arc::new(Notify::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Request the action. Starts a pending window if none is open, otherwise
    /// extends the current one up to its hard deadline.
    pub fn execute_with_delay(&self) {
        let now = Instant::now();
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match window.as_mut() {
            Some(pending) => {
                pending.deadline = (now + self.min_delay).min(pending.hard_deadline);
                self.rearm.notify_one();
            }
            None => {
                *window = Some(Window {
                    deadline: now + self.min_delay,
                    hard_deadline: now + self.max_delay,
                });
                drop(window);
                self.spawn_waiter();
            }
        }
    }

    fn spawn_waiter(&self) {
        let window = self.window.clone();
        let rearm = self.rearm.clone();
        let action = self.action.clone();

        self.tracker.spawn(async move {
            loop {
                let deadline = match window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                {
                    Some(pending) => pending.deadline.min(pending.hard_deadline),
                    None => return,
                };

                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        window
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        action();
                        return;
                    }
                    _ = rearm.notified() => {
                        // deadline moved; re-read it
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_once_per_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let trigger = CoalescingDelayedTrigger::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        for _ in 0..5 {
            trigger.execute_with_delay();
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hard_deadline_bounds_extension() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let trigger = CoalescingDelayedTrigger::new(
            Duration::from_millis(30),
            Duration::from_millis(80),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Keep poking more often than min_delay; the hard deadline must still
        // fire the action.
        for _ in 0..10 {
            trigger.execute_with_delay();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn new_window_opens_after_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let trigger = CoalescingDelayedTrigger::new(
            Duration::from_millis(10),
            Duration::from_millis(40),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        trigger.execute_with_delay();
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.execute_with_delay();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
