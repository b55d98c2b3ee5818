//! Millisecond timestamps and half-open time ranges, as used throughout the
//! block and job data model (§3).

use std::fmt;

/// A timestamp in milliseconds since the unix epoch, as carried on
/// `Block::min_time`/`max_time` and `Job::range_start`/`range_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TimestampMillis(pub i64);

impl TimestampMillis {
    /// The zero timestamp (unix epoch).
    pub const ZERO: Self = Self(0);

    /// Construct from a raw millisecond value.
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Raw millisecond value.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Round down to the nearest multiple of `range` milliseconds, i.e. the
    /// start of the bucket this timestamp belongs to (§4.5 Stage B.1).
    pub fn align_down(&self, range_millis: i64) -> Self {
        debug_assert!(range_millis > 0);
        Self(self.0 - self.0.rem_euclid(range_millis))
    }
}

impl fmt::Display for TimestampMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<i64> for TimestampMillis {
    type Output = Self;
    fn add(self, rhs: i64) -> Self {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub<i64> for TimestampMillis {
    type Output = Self;
    fn sub(self, rhs: i64) -> Self {
        Self(self.0 - rhs)
    }
}

impl std::ops::Sub for TimestampMillis {
    type Output = i64;
    fn sub(self, rhs: Self) -> i64 {
        self.0 - rhs.0
    }
}

/// A half-open time range `[start, end)` in milliseconds, e.g. a block's
/// `[min_time, max_time)` or a job's `[range_start, range_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: TimestampMillis,
    /// Exclusive end.
    pub end: TimestampMillis,
}

impl TimeRange {
    /// Construct a new range, panicking if it is not `start < end` (§3
    /// invariant on `Block`: `min_time < max_time`).
    pub fn new(start: TimestampMillis, end: TimestampMillis) -> Self {
        assert!(start < end, "time range start must be before end");
        Self { start, end }
    }

    /// Length of the range, in milliseconds.
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    /// A range never has zero or negative length by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `point` falls within `[start, end)`.
    pub fn contains(&self, point: TimestampMillis) -> bool {
        point >= self.start && point < self.end
    }

    /// Whether this range fully contains `[other.start, other.end]`
    /// (note: inclusive on both ends, matching §8 invariant 2's
    /// `range_start(J) <= min_time(a)` and `max_time(a) <= range_end(J)`).
    pub fn covers_inclusive(&self, min_time: TimestampMillis, max_time: TimestampMillis) -> bool {
        self.start <= min_time && max_time <= self.end
    }

    /// Whether two half-open ranges overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}
