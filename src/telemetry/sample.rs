//! Timed telemetry samples and ordered sample streams.
//!
//! A sample carries all three time values (see [`crate::clock`]) plus the
//! telemetry channels and a source tag. Vehicle telemetry and position
//! telemetry arrive as independently sampled streams with different
//! channels populated; merging fills the gaps in a presentation copy only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::{ClockModel, SessionTime};

/// Which origin stream produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Original sample from the vehicle telemetry stream.
    Car,
    /// Original sample from the position telemetry stream.
    Pos,
    /// Artificially created; channel values are computed or interpolated.
    Interpolated,
}

impl Source {
    pub fn is_original(self) -> bool {
        !matches!(self, Source::Interpolated)
    }
}

/// On-track flag from the position stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarStatus {
    OnTrack,
    OffTrack,
}

/// Telemetry channel values of one sample.
///
/// A channel is `None` when the producing stream does not carry it (car
/// samples have no coordinates, position samples no speed) or when the
/// upstream feed dropped the value.
///
/// Continuous channels (`speed`, `rpm`, `throttle`, `x`, `y`, `z`) may be
/// interpolated linearly in session time. Discrete channels (`gear`,
/// `brake`, `drs`, `status`) are filled from the nearest neighbor and never
/// interpolated numerically; a gear of 3.5 is not a thing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Channels {
    pub speed: Option<f64>,
    pub rpm: Option<f64>,
    pub throttle: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub gear: Option<u8>,
    pub brake: Option<bool>,
    pub drs: Option<u8>,
    pub status: Option<CarStatus>,
}

/// One telemetry or timing observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSample {
    /// Duration since the session-wide zero point. Carried verbatim through
    /// slicing and merging.
    pub session_time: SessionTime,
    /// Absolute UTC timestamp; `date = t0 + session_time`. Carried verbatim.
    pub date: DateTime<Utc>,
    /// Duration since the first sample of the containing sequence.
    /// Recomputed whenever the sample lands in a new sequence.
    pub time: Duration,
    pub channels: Channels,
    pub source: Source,
}

impl TimedSample {
    /// Build a sample under a session clock; `time` is filled in by the
    /// stream that ends up owning the sample.
    pub fn new(
        clock: &ClockModel,
        session_time: SessionTime,
        channels: Channels,
        source: Source,
    ) -> Self {
        TimedSample {
            session_time,
            date: clock.date_of(session_time),
            time: Duration::ZERO,
            channels,
            source,
        }
    }
}

/// An ordered sequence of samples from one source stream, or a slice of one.
///
/// Samples are kept ordered by `session_time`, and every constructor
/// recomputes the slice-relative `time` of each sample, so a stale `time`
/// from a previous slicing can never leak through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStream {
    clock: ClockModel,
    samples: Vec<TimedSample>,
}

impl TelemetryStream {
    /// Build a stream from samples, sorting by session time (stable) and
    /// rebasing `time`.
    pub fn new(clock: ClockModel, mut samples: Vec<TimedSample>) -> Self {
        samples.sort_by_key(|s| s.session_time);
        rebase(&mut samples);
        TelemetryStream { clock, samples }
    }

    /// Build a stream from raw channel readings, deriving each sample's
    /// absolute date from the clock.
    pub fn from_readings<I>(clock: ClockModel, source: Source, readings: I) -> Self
    where
        I: IntoIterator<Item = (SessionTime, Channels)>,
    {
        let samples = readings
            .into_iter()
            .map(|(session_time, channels)| TimedSample::new(&clock, session_time, channels, source))
            .collect();
        Self::new(clock, samples)
    }

    pub fn clock(&self) -> &ClockModel {
        &self.clock
    }

    pub fn samples(&self) -> &[TimedSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Session time of the first sample, the `s0` this stream's `time`
    /// values are relative to.
    pub fn first_session_time(&self) -> Option<SessionTime> {
        self.samples.first().map(|s| s.session_time)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimedSample> {
        self.samples.iter()
    }
}

/// Recompute `time` for every sample relative to the sequence's first
/// sample.
pub(crate) fn rebase(samples: &mut [TimedSample]) {
    let Some(s0) = samples.first().map(|s| s.session_time) else {
        return;
    };
    for sample in samples.iter_mut() {
        sample.time = sample.session_time.saturating_sub(s0);
    }
}
