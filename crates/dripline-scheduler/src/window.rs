//! Clock and eligibility-window calculation.
//!
//! A window `(low, high)` in days maps to the half-open interval
//! `[now - high days, now - low days)`. Inactivity windows (anchored on
//! `lastActiveAt`) close the newer end: idle for exactly `low` days counts.

use chrono::{DateTime, Duration, Utc};
use dripline_core::{AgeWindow, DriplineError, Result, WindowAnchor};

/// Source of "now". Injected so runs are reproducible in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Where a timestamp falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Older than the window: the opportunity has gone.
    Passed,
    Inside,
    /// Newer than the window: not due yet.
    Early,
}

/// Concrete timestamp interval `[start, end)`, or `[start, end]` when
/// `inclusive_end` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub inclusive_end: bool,
}

impl Window {
    /// Build the window for day offsets `(low, high)` relative to `now`.
    pub fn from_offsets(now: DateTime<Utc>, low_days: i64, high_days: i64) -> Result<Self> {
        if low_days < 0 || high_days < 0 {
            return Err(DriplineError::Configuration(format!(
                "Window offsets must be non-negative (got {low_days}..{high_days})"
            )));
        }
        if low_days > high_days {
            return Err(DriplineError::Configuration(format!(
                "Window offsets are inverted (got {low_days}..{high_days})"
            )));
        }
        Ok(Self {
            start: now - Duration::days(high_days),
            end: now - Duration::days(low_days),
            inclusive_end: false,
        })
    }

    pub fn for_age(now: DateTime<Utc>, age: &AgeWindow) -> Result<Self> {
        let window = Self::from_offsets(now, age.low_days, age.high_days)?;
        Ok(Self {
            inclusive_end: age.anchor == WindowAnchor::LastActiveAt,
            ..window
        })
    }

    pub fn position(&self, ts: DateTime<Utc>) -> WindowPosition {
        let early = if self.inclusive_end { ts > self.end } else { ts >= self.end };
        if ts < self.start {
            WindowPosition::Passed
        } else if early {
            WindowPosition::Early
        } else {
            WindowPosition::Inside
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.position(ts) == WindowPosition::Inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_bounds_are_half_open() {
        let w = Window::from_offsets(now(), 7, 8).unwrap();
        assert_eq!(w.start, now() - Duration::days(8));
        assert_eq!(w.end, now() - Duration::days(7));
        assert!(w.contains(w.start));
        assert!(!w.contains(w.end));
    }

    #[test]
    fn test_positions() {
        let w = Window::from_offsets(now(), 7, 8).unwrap();
        assert_eq!(w.position(now() - Duration::hours(180)), WindowPosition::Inside); // 7.5d
        assert_eq!(w.position(now() - Duration::days(9)), WindowPosition::Passed);
        assert_eq!(w.position(now() - Duration::days(3)), WindowPosition::Early);
    }

    #[test]
    fn test_invalid_offsets() {
        assert!(matches!(
            Window::from_offsets(now(), -1, 3),
            Err(DriplineError::Configuration(_))
        ));
        assert!(matches!(
            Window::from_offsets(now(), 8, 7),
            Err(DriplineError::Configuration(_))
        ));
    }

    #[test]
    fn test_equal_offsets_give_empty_window() {
        let w = Window::from_offsets(now(), 3, 3).unwrap();
        assert!(!w.contains(now() - Duration::days(3)));
        assert!(!w.contains(now() - Duration::hours(73)));
    }

    #[test]
    fn test_inactivity_window_includes_newer_bound() {
        let age = AgeWindow {
            anchor: WindowAnchor::LastActiveAt,
            low_days: 7,
            high_days: 14,
        };
        let w = Window::for_age(now(), &age).unwrap();
        assert!(w.inclusive_end);
        assert!(w.contains(now() - Duration::days(7)));
        assert!(w.contains(now() - Duration::days(14)));
        assert_eq!(
            w.position(now() - Duration::days(7) + Duration::seconds(1)),
            WindowPosition::Early
        );

        let signup = AgeWindow {
            anchor: WindowAnchor::CreatedAt,
            low_days: 7,
            high_days: 8,
        };
        assert!(!Window::for_age(now(), &signup).unwrap().contains(now() - Duration::days(7)));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock(now());
        assert_eq!(clock.now(), now());
    }
}
