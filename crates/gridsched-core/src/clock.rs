//! Time source and calendar bindings.
//!
//! Every scheduler timestamp is UTC seconds since the epoch as `f64`. The
//! [`Clock`] trait lets tests pin time with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::expr::Bindings;

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in epoch seconds.
    fn now(&self) -> f64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Calendar variables available to MINPRICE expressions.
///
/// `wday` counts from Monday = 0 and `yday` from January 1st = 1.
pub fn calendar_bindings(now: f64) -> Bindings {
    let when = DateTime::<Utc>::from_timestamp(now.floor() as i64, 0).unwrap_or_default();
    Bindings::from([
        ("hour".to_string(), when.hour() as f64),
        ("wday".to_string(), when.weekday().num_days_from_monday() as f64),
        ("yday".to_string(), when.ordinal() as f64),
        ("date".to_string(), when.day() as f64),
        ("month".to_string(), when.month() as f64),
        ("year".to_string(), when.year() as f64),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1000.0);
        clock.advance(61.5);
        assert_eq!(clock.now(), 1061.5);
    }

    #[test]
    fn system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn calendar_fields_for_known_instant() {
        // 2024-03-05T14:30:00Z, a Tuesday.
        let b = calendar_bindings(1_709_649_000.0);
        assert_eq!(b["hour"], 14.0);
        assert_eq!(b["wday"], 1.0);
        assert_eq!(b["yday"], 65.0);
        assert_eq!(b["date"], 5.0);
        assert_eq!(b["month"], 3.0);
        assert_eq!(b["year"], 2024.0);
    }
}
