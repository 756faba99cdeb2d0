use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};

const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Sliding-window request quota
///
/// Keeps the timestamps of requests admitted inside the last `window`.
/// A timestamp exactly `window` old still counts against the quota.
pub struct QuotaTracker {
    window: Duration,
    max_requests: usize,
    cooldown: Duration,
    admitted: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    /// Create a tracker on the system clock
    ///
    /// # Arguments
    /// * `window` - Length of the sliding window
    /// * `max_requests` - Requests allowed inside one window
    /// * `cooldown` - Upper bound of a single backoff slice
    pub fn new(window: Duration, max_requests: usize, cooldown: Duration) -> Self {
        Self::with_clock(window, max_requests, cooldown, Arc::new(SystemClock))
    }

    pub fn with_clock(
        window: Duration,
        max_requests: usize,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
            cooldown: cooldown.max(MIN_BACKOFF),
            admitted: Mutex::new(VecDeque::with_capacity(max_requests.min(4096))),
            clock,
        }
    }

    /// Try to admit one request now.
    ///
    /// Returns `Duration::ZERO` when the request was admitted (and recorded),
    /// otherwise how long to wait before asking again.
    pub fn admit(&self) -> Duration {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cutoff) = now.checked_sub(self.window) {
            while admitted.front().is_some_and(|&t| t < cutoff) {
                admitted.pop_front();
            }
        }

        if admitted.len() >= self.max_requests {
            let Some(&oldest) = admitted.front() else {
                return self.cooldown;
            };
            let leaves_window = (oldest + self.window).saturating_duration_since(now);
            return leaves_window.min(self.cooldown).max(MIN_BACKOFF);
        }

        admitted.push_back(now);
        Duration::ZERO
    }

    /// Requests currently counted inside the window (without pruning)
    pub fn in_window(&self) -> usize {
        self.admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use proptest::prelude::*;

    fn tracker(window_ms: u64, max: usize) -> (QuotaTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = QuotaTracker::with_clock(
            Duration::from_millis(window_ms),
            max,
            Duration::from_millis(50),
            clock.clone(),
        );
        (tracker, clock)
    }

    #[test]
    fn test_admits_until_quota_is_used() {
        let (tracker, _clock) = tracker(10_000, 3);

        assert_eq!(tracker.admit(), Duration::ZERO);
        assert_eq!(tracker.admit(), Duration::ZERO);
        assert_eq!(tracker.admit(), Duration::ZERO);

        let wait = tracker.admit();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(50));
        assert_eq!(tracker.in_window(), 3);
    }

    #[test]
    fn test_boundary_tie_is_still_inside() {
        let (tracker, clock) = tracker(1_000, 1);
        assert_eq!(tracker.admit(), Duration::ZERO);

        clock.advance(Duration::from_millis(1_000));
        assert!(tracker.admit() > Duration::ZERO, "entry exactly window old must count");

        clock.advance(Duration::from_millis(1));
        assert_eq!(tracker.admit(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_shrinks_to_window_exit() {
        let (tracker, clock) = tracker(100, 1);
        assert_eq!(tracker.admit(), Duration::ZERO);

        clock.advance(Duration::from_millis(90));
        assert_eq!(tracker.admit(), Duration::from_millis(10));
    }

    #[test]
    fn test_concurrent_admission_never_overshoots() {
        let (tracker, _clock) = tracker(60_000, 100);
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || (0..50).filter(|_| tracker.admit().is_zero()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    proptest! {
        #[test]
        fn prop_never_more_than_max_in_any_window(
            window_ms in 1u64..500,
            max in 1usize..20,
            steps in proptest::collection::vec(0u64..60, 1..300),
        ) {
            let (tracker, clock) = tracker(window_ms, max);
            let mut elapsed = 0u64;
            let mut admitted_at = Vec::new();

            for step in steps {
                elapsed += step;
                clock.set_elapsed(Duration::from_millis(elapsed));
                if tracker.admit().is_zero() {
                    admitted_at.push(elapsed);
                }
            }

            for &t in &admitted_at {
                let from = t.saturating_sub(window_ms);
                let inside = admitted_at.iter().filter(|&&a| a >= from && a <= t).count();
                prop_assert!(inside <= max, "{} admitted in window ending at {}", inside, t);
            }
        }
    }
}
