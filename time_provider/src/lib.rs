//! A small time abstraction used everywhere the compaction core needs "now":
//! block age checks (`first_level_compaction_wait_period`), retention
//! (`now - retention`), deletion-mark age (`deletion_delay`), and ring
//! heartbeat timeouts. Business logic takes time through [`TimeProvider`]
//! rather than calling `SystemTime::now()`/`Instant::now()` directly, so
//! tests can drive a fake clock deterministically.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs, clippy::use_self)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime},
};

/// A point in time, expressed as UTC wall-clock time.
///
/// Stored as a `DateTime<Utc>` rather than a raw `i64` so unit mistakes
/// (seconds vs. milliseconds) can't silently compile; conversions to the
/// unix-seconds / unix-millis fields used on the wire (§6) are explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Construct from milliseconds since the unix epoch.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    /// Construct from seconds since the unix epoch.
    pub fn from_timestamp_secs(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    /// Milliseconds since the unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Seconds since the unix epoch, as used by `deletion_time`/`updated_at`.
    pub fn timestamp_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Duration elapsed between `earlier` and `self`. Saturates to zero if
    /// `earlier` is actually later.
    pub fn checked_duration_since(&self, earlier: Self) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// `self + delta`.
    pub fn add(&self, delta: Duration) -> Self {
        Self(
            self.0
                + chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero()),
        )
    }

    /// `self - delta`.
    pub fn sub(&self, delta: Duration) -> Self {
        Self(
            self.0
                - chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero()),
        )
    }
}

impl From<SystemTime> for Time {
    fn from(t: SystemTime) -> Self {
        Self(DateTime::<Utc>::from(t))
    }
}

/// Abstraction over "what time is it", so retention/ageing decisions are
/// testable without waiting on a real clock.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// [`TimeProvider`] backed by the OS clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new [`SystemProvider`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from(SystemTime::now())
    }
}

/// [`TimeProvider`] that returns a fixed, externally-advanceable time.
///
/// Used throughout the planner, cleaner, and ring test suites to assert
/// age-dependent behavior (e.g. the premature-compaction guard in §4.5
/// Stage D, or retention in §4.7 step 2) without real sleeps.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a mock clock fixed at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn inc(&self, delta: Duration) {
        let mut now = self.now.write();
        *now = now.add(delta);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

/// Convenience constructor for an `Arc<dyn TimeProvider>` wrapping a
/// [`MockProvider`], the shape most call sites want in tests.
pub fn mock_time_provider(start_millis: i64) -> Arc<dyn TimeProvider> {
    Arc::new(MockProvider::new(Time::from_timestamp_millis(start_millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances_on_inc() {
        let mock = MockProvider::new(Time::from_timestamp_secs(1_000));
        assert_eq!(mock.now().timestamp_secs(), 1_000);
        mock.inc(Duration::from_secs(30));
        assert_eq!(mock.now().timestamp_secs(), 1_030);
    }

    #[test]
    fn duration_since_saturates_at_zero() {
        let early = Time::from_timestamp_secs(100);
        let late = Time::from_timestamp_secs(50);
        assert_eq!(early.checked_duration_since(late), Duration::from_secs(50));
        assert_eq!(late.checked_duration_since(early), Duration::ZERO);
    }
}
