//! Slicing streams to laps and arbitrary session-time ranges.
//!
//! Slices select samples with session time in `[start, end]`. Padding keeps
//! one extra real sample beyond a boundary so that a later interpolation at
//! the exact boundary has two real neighbors; edge interpolation synthesizes
//! exact-boundary samples and drops the padding again. Every retained
//! sample's `time` is recomputed relative to the slice's own first sample.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sample::{Channels, Source, TelemetryStream, TimedSample};
use crate::clock::SessionTime;
use crate::error::{DataError, Result};
use crate::laps::Lap;

/// Which slice boundaries get one extra sample of margin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pad {
    #[default]
    None,
    Before,
    After,
    Both,
}

impl Pad {
    fn before(self) -> bool {
        matches!(self, Pad::Before | Pad::Both)
    }

    fn after(self) -> bool {
        matches!(self, Pad::After | Pad::Both)
    }
}

/// Slice a stream to `[start, end]` by session time.
///
/// With `interpolate_edges`, exact-boundary samples are synthesized by
/// linear interpolation between the nearest real samples and tagged
/// [`Source::Interpolated`]; padding samples outside the range are then
/// dropped.
///
/// Fewer than two in-range samples is reported as
/// [`DataError::EmptySlice`] so callers can tell "no data" apart from a
/// silently empty success.
pub fn slice_by_time(
    stream: &TelemetryStream,
    start: SessionTime,
    end: SessionTime,
    pad: Pad,
    interpolate_edges: bool,
) -> Result<TelemetryStream> {
    let samples = stream.samples();
    let lo = samples.partition_point(|s| s.session_time < start);
    let hi = samples.partition_point(|s| s.session_time <= end);

    // hi < lo when the requested range is inverted
    if hi.saturating_sub(lo) < 2 {
        return Err(DataError::EmptySlice {
            start: start.as_duration(),
            end: end.as_duration(),
        });
    }

    let padded_lo = if pad.before() { lo.saturating_sub(1) } else { lo };
    let padded_hi = if pad.after() { (hi + 1).min(samples.len()) } else { hi };

    let mut out: Vec<TimedSample> = if interpolate_edges {
        let mut out = Vec::with_capacity(hi - lo + 2);

        // synthesized start boundary, when there is a real neighbor before it
        if samples[lo].session_time > start && lo > 0 {
            out.push(interpolate_at(stream, &samples[lo - 1], &samples[lo], start));
        }
        out.extend_from_slice(&samples[lo..hi]);
        if samples[hi - 1].session_time < end && hi < samples.len() {
            out.push(interpolate_at(stream, &samples[hi - 1], &samples[hi], end));
        }
        out
    } else {
        samples[padded_lo..padded_hi].to_vec()
    };

    debug!(
        samples = out.len(),
        start = ?start.as_duration(),
        end = ?end.as_duration(),
        "sliced stream"
    );

    // `time` is rebased onto the new sequence; `session_time` and `date`
    // carry over verbatim.
    out.sort_by_key(|s| s.session_time);
    Ok(TelemetryStream::new(*stream.clock(), out))
}

/// Slice a stream to one lap's `[start, end]` window.
pub fn slice_by_lap(
    stream: &TelemetryStream,
    lap: &Lap,
    pad: Pad,
    interpolate_edges: bool,
) -> Result<TelemetryStream> {
    slice_by_time(stream, lap.start, lap.end, pad, interpolate_edges)
}

/// Synthesize a sample at `at`, between real neighbors `a` and `b`.
///
/// Continuous channels are interpolated linearly when both neighbors carry
/// the value; discrete channels and one-sided values take the nearest
/// preceding value (falling back to the following one). The sample is
/// tagged as interpolated and dated via the stream clock, preserving
/// `date = t0 + session_time`.
fn interpolate_at(
    stream: &TelemetryStream,
    a: &TimedSample,
    b: &TimedSample,
    at: SessionTime,
) -> TimedSample {
    let span = b.session_time.saturating_sub(a.session_time).as_secs_f64();
    let frac = if span > 0.0 {
        at.saturating_sub(a.session_time).as_secs_f64() / span
    } else {
        0.0
    };

    let lerp = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => Some(x + (y - x) * frac),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    };
    fn hold<T: Copy>(x: Option<T>, y: Option<T>) -> Option<T> {
        x.or(y)
    }

    let (ca, cb) = (&a.channels, &b.channels);
    let channels = Channels {
        speed: lerp(ca.speed, cb.speed),
        rpm: lerp(ca.rpm, cb.rpm),
        throttle: lerp(ca.throttle, cb.throttle),
        x: lerp(ca.x, cb.x),
        y: lerp(ca.y, cb.y),
        z: lerp(ca.z, cb.z),
        gear: hold(ca.gear, cb.gear),
        brake: hold(ca.brake, cb.brake),
        drs: hold(ca.drs, cb.drs),
        status: hold(ca.status, cb.status),
    };

    TimedSample::new(stream.clock(), at, channels, Source::Interpolated)
}
