//! Clock sources
//!
//! Durations are always measured on a monotonic `Instant`; calendar values
//! (session start, visit timestamps) come from the wall clock. A `Clock` hands
//! out both so the engine never mixes them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source of monotonic instants and wall-clock timestamps
pub trait Clock: Send + Sync {
    /// Monotonic instant for duration math
    fn now(&self) -> Instant;

    /// Wall-clock time for calendar fields
    fn wall(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
struct ManualState {
    base_instant: Instant,
    base_wall: DateTime<Utc>,
    offset: Duration,
}

/// Manually advanced clock for replay and tests
///
/// Clones share the same time, so a handle kept outside the engine can advance
/// the engine's clock. Time never moves backwards.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Create a clock whose wall time starts at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                base_instant: Instant::now(),
                base_wall: start,
                offset: Duration::ZERO,
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ManualState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        self.with_state(|s| s.offset += by);
    }

    /// Move time forward by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Move time forward to the wall-clock time `to`
    ///
    /// Targets earlier than the current time are ignored.
    pub fn advance_to(&self, to: DateTime<Utc>) {
        self.with_state(|s| {
            if let Ok(target) = (to - s.base_wall).to_std() {
                if target > s.offset {
                    s.offset = target;
                }
            }
        });
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.with_state(|s| s.offset)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.with_state(|s| s.base_instant + s.offset)
    }

    fn wall(&self) -> DateTime<Utc> {
        self.with_state(|s| {
            s.base_wall + chrono::Duration::from_std(s.offset).unwrap_or(chrono::Duration::zero())
        })
    }
}

/// Seconds from `earlier` to `later`, zero if `later` is not after `earlier`
pub(crate) fn seconds_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances_both_sources() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let t0 = clock.now();

        clock.advance_secs(90);

        assert_eq!(clock.now() - t0, Duration::from_secs(90));
        assert_eq!(clock.wall(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let handle = clock.clone();

        handle.advance_secs(30);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_advance_to_never_goes_back() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance_to(start + chrono::Duration::minutes(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(600));

        clock.advance_to(start + chrono::Duration::minutes(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(600));

        clock.advance_to(start - chrono::Duration::minutes(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(600));
    }

    #[test]
    fn test_seconds_between_saturates() {
        let a = Instant::now();
        let b = a + Duration::from_millis(1500);
        assert_eq!(seconds_between(a, b), 1.5);
        assert_eq!(seconds_between(b, a), 0.0);
    }
}
