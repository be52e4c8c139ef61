//! The three time domains used by session data.
//!
//! Every sample carries three time values:
//!
//! - **SessionTime**: duration since an arbitrary, session-wide zero point
//!   set before official session start. Common reference across all data
//!   sources for one session, monotonically increasing per source.
//! - **Date**: absolute UTC timestamp. `Date = t0 + SessionTime` always,
//!   where `t0` is the fixed per-session offset.
//! - **Time**: duration since the first sample of whatever ordered sequence
//!   currently contains the sample. Not a stable property: it must be
//!   recomputed whenever a sequence is re-sliced or concatenated, and never
//!   copied across slicing operations. Only `SessionTime` and `Date` are
//!   carried forward verbatim.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::Duration;

/// Duration since the session-wide zero point.
///
/// Ordered and hashable so it can serve as a merge axis and map key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SessionTime(Duration);

impl SessionTime {
    pub const ZERO: SessionTime = SessionTime(Duration::ZERO);

    pub fn new(duration: Duration) -> Self {
        SessionTime(duration)
    }

    pub fn from_millis(millis: u64) -> Self {
        SessionTime(Duration::from_millis(millis))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Difference to an earlier session time, `None` if `earlier` is later.
    pub fn checked_sub(self, earlier: SessionTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Difference to an earlier session time, clamped at zero.
    pub fn saturating_sub(self, earlier: SessionTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<Duration> for SessionTime {
    fn from(duration: Duration) -> Self {
        SessionTime(duration)
    }
}

impl Add<Duration> for SessionTime {
    type Output = SessionTime;

    fn add(self, rhs: Duration) -> SessionTime {
        SessionTime(self.0 + rhs)
    }
}

impl Sub<Duration> for SessionTime {
    type Output = SessionTime;

    fn sub(self, rhs: Duration) -> SessionTime {
        SessionTime(self.0.saturating_sub(rhs))
    }
}

/// The fixed affine transform between session time and wall-clock time.
///
/// `t0` is the absolute UTC timestamp corresponding to `SessionTime` zero.
/// It does not mark the start of the session itself; the data usually starts
/// well before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockModel {
    t0: DateTime<Utc>,
}

impl ClockModel {
    pub fn new(t0: DateTime<Utc>) -> Self {
        ClockModel { t0 }
    }

    /// Absolute timestamp of `SessionTime` zero.
    pub fn t0(&self) -> DateTime<Utc> {
        self.t0
    }

    /// `Date = t0 + SessionTime`.
    pub fn date_of(&self, session_time: SessionTime) -> DateTime<Utc> {
        // i64 nanoseconds cover ~292 years of session time
        self.t0 + TimeDelta::nanoseconds(session_time.as_duration().as_nanos() as i64)
    }

    /// Inverse of [`date_of`](Self::date_of); `None` for dates before `t0`.
    pub fn session_time_of(&self, date: DateTime<Utc>) -> Option<SessionTime> {
        let delta = date.signed_duration_since(self.t0);
        delta.to_std().ok().map(SessionTime::new)
    }

    /// Derive the session epoch from `(Date, Time)` pairs of one or more
    /// telemetry data sets.
    ///
    /// The latest computable offset wins, on the assumption that it is the
    /// timestamp with the least transmission delay. The result is rounded to
    /// whole milliseconds. Returns `None` when no pairs are given.
    pub fn from_samples<I>(samples: I) -> Option<ClockModel>
    where
        I: IntoIterator<Item = (DateTime<Utc>, Duration)>,
    {
        let mut t0: Option<DateTime<Utc>> = None;
        for (date, time) in samples {
            let offset = date - TimeDelta::nanoseconds(time.as_nanos() as i64);
            if t0.is_none_or(|current| offset > current) {
                t0 = Some(offset);
            }
        }
        t0.and_then(round_to_millis).map(ClockModel::new)
    }
}

fn round_to_millis(date: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let micros = date.timestamp_micros();
    let millis = (micros + 500).div_euclid(1000);
    DateTime::from_timestamp_millis(millis)
}
