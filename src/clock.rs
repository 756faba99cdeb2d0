use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source for quota accounting
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time source for minute-boundary decisions
pub trait WallClock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl WallClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replays
///
/// Both the monotonic and wall readings move together when advanced.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc: start,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Move to an absolute offset from the start; never moves backwards
    pub fn set_elapsed(&self, elapsed: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        if elapsed > *offset {
            *offset = elapsed;
        }
    }

    fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }
}

impl WallClock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed())
            .ok()
            .and_then(|elapsed| self.base_utc.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_moves_both_readings() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        let clock = ManualClock::new(start);
        let t0 = Clock::now(&clock);

        clock.advance(Duration::from_secs(3));

        assert_eq!(Clock::now(&clock) - t0, Duration::from_secs(3));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(3));
    }

    #[test]
    fn test_set_elapsed_never_rewinds() {
        let clock = ManualClock::new(Utc::now());
        clock.set_elapsed(Duration::from_secs(10));
        clock.set_elapsed(Duration::from_secs(4));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }
}
