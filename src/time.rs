//! Time handling: metric sample windows and client clock-skew correction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Granularity used when rounding a client's clock offset.
///
/// Clients send their local time; anything not a multiple of half an hour is
/// treated as clock drift rather than a timezone difference.
pub const SKEW_GRANULARITY_SECS: i64 = 1800;

/// Largest clock offset accepted from a client (one day).
pub const MAX_SKEW_SECS: i64 = 86_400;

/// Parses a unix timestamp in seconds.
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// A closed time window `[start, end]` for fetching metric samples.
///
/// # Examples
///
/// ```
/// use livequery::SampleWindow;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let window = SampleWindow::parse("-3600", "now", now).unwrap();
/// assert_eq!(window.duration(), Duration::hours(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (inclusive).
    pub end: DateTime<Utc>,
}

impl SampleWindow {
    /// Creates a window from two timestamps.
    ///
    /// Returns `None` if `start > end`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a window covering the last `duration` up to `now`.
    #[must_use]
    pub fn last(duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - duration,
            end: now,
        }
    }

    /// Parses window bounds.
    ///
    /// Each bound is `now`, a negative offset in seconds relative to `now`
    /// (`-3600`), or an absolute unix timestamp.
    pub fn parse(start: &str, end: &str, now: DateTime<Utc>) -> Option<Self> {
        let start = parse_bound(start, now)?;
        let end = parse_bound(end, now)?;
        Self::new(start, end)
    }

    /// Returns the length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

fn parse_bound(token: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let token = token.trim();
    if token.eq_ignore_ascii_case("now") {
        return Some(now);
    }
    let secs: i64 = token.parse().ok()?;
    if secs < 0 {
        return now.checked_sub_signed(Duration::seconds(secs.checked_neg()?));
    }
    from_unix(secs)
}

/// Offset between the client's clock and ours.
///
/// Output times are shifted into the client's clock, and filter literals
/// (which are in the client's clock) are compared against shifted row times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClockSkew {
    offset_secs: i64,
}

impl ClockSkew {
    /// No correction.
    pub const NONE: Self = Self { offset_secs: 0 };

    /// Computes the skew from the client's reported local time.
    ///
    /// Returns `None` if the offset exceeds [`MAX_SKEW_SECS`].
    #[must_use]
    pub fn from_client_time(client_secs: i64, now: DateTime<Utc>) -> Option<Self> {
        let raw = client_secs - now.timestamp();
        let rounded = round_to_granularity(raw);
        (rounded.abs() <= MAX_SKEW_SECS).then_some(Self {
            offset_secs: rounded,
        })
    }

    /// Returns the offset in seconds (client minus server).
    #[must_use]
    pub const fn offset_secs(&self) -> i64 {
        self.offset_secs
    }

    /// Shifts a server-side time into the client's clock.
    #[must_use]
    pub fn to_client(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        t.checked_add_signed(Duration::seconds(self.offset_secs))
            .unwrap_or(t)
    }
}

fn round_to_granularity(secs: i64) -> i64 {
    let half = SKEW_GRANULARITY_SECS / 2;
    let biased = if secs >= 0 { secs + half } else { secs - half };
    (biased / SKEW_GRANULARITY_SECS) * SKEW_GRANULARITY_SECS
}
