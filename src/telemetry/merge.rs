//! Merging independently sampled telemetry streams.
//!
//! The vehicle and position streams have no common time base. [`merge`]
//! produces a single table ordered by session time in which every channel
//! has a value at every timestamp, filling the gaps by interpolation.
//!
//! The merged output is for presentation and light slicing only. Anything
//! accumulation-sensitive (integrating speed into distance, differentiating
//! positions) must run on the original per-source streams, because
//! interpolated values compound error. That discipline cannot be enforced at
//! runtime, so it is encoded in the type: the result is a
//! [`PresentationStream`], and code that wants a plain stream back has to
//! say [`PresentationStream::into_inner`] explicitly.

use tracing::trace;

use super::sample::{Channels, TelemetryStream, TimedSample};
use crate::error::{DataError, Result};

/// A merged, gap-filled stream for presentation purposes.
///
/// Deliberately not a `TelemetryStream`: interpolated channel values make it
/// unsuitable as input to accumulation-sensitive computation.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationStream(TelemetryStream);

impl PresentationStream {
    pub fn samples(&self) -> &[TimedSample] {
        self.0.samples()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwrap into a plain stream. This is the explicit opt-out of the
    /// presentation-only contract; the caller takes responsibility for not
    /// feeding interpolated values into accumulation-sensitive math.
    pub fn into_inner(self) -> TelemetryStream {
        self.0
    }
}

/// Merge two streams into one ordered table on the common session-time
/// axis.
///
/// The merge is strict and stable: samples are ordered by session time, and
/// on exact ties `a`'s sample precedes `b`'s. Original samples keep their
/// source tag and their measured channel values untouched; only channels
/// missing on a sample are filled from the other stream, linearly for
/// continuous channels and from the nearest neighbor for discrete ones.
///
/// Deterministic for identical inputs; the merger retains no state.
pub fn merge(a: &TelemetryStream, b: &TelemetryStream) -> Result<PresentationStream> {
    if a.clock() != b.clock() {
        return Err(DataError::Config {
            reason: "cannot merge streams with different session clocks".into(),
        });
    }

    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut ia, mut ib) = (0usize, 0usize);
    let (sa, sb) = (a.samples(), b.samples());
    while ia < sa.len() || ib < sb.len() {
        let take_a = match (sa.get(ia), sb.get(ib)) {
            (Some(x), Some(y)) => x.session_time <= y.session_time,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if take_a {
            merged.push(sa[ia]);
            ia += 1;
        } else {
            merged.push(sb[ib]);
            ib += 1;
        }
    }

    fill_missing(&mut merged);
    trace!(samples = merged.len(), "merged telemetry streams");
    // TelemetryStream::new rebases `time` onto the merged sequence
    Ok(PresentationStream(TelemetryStream::new(*a.clock(), merged)))
}

/// Fill channel gaps in a merged sample table.
///
/// Continuous channels are interpolated linearly in session time between
/// the nearest known values and extended with the nearest value at the
/// edges. Discrete channels are forward-filled, with a single backward fill
/// to cover leading gaps.
pub(crate) fn fill_missing(samples: &mut [TimedSample]) {
    fill_continuous(samples, |c| c.speed, |c, v| c.speed = Some(v));
    fill_continuous(samples, |c| c.rpm, |c, v| c.rpm = Some(v));
    fill_continuous(samples, |c| c.throttle, |c, v| c.throttle = Some(v));
    fill_continuous(samples, |c| c.x, |c, v| c.x = Some(v));
    fill_continuous(samples, |c| c.y, |c, v| c.y = Some(v));
    fill_continuous(samples, |c| c.z, |c, v| c.z = Some(v));

    fill_discrete(samples, |c| c.gear, |c, v| c.gear = Some(v));
    fill_discrete(samples, |c| c.brake, |c, v| c.brake = Some(v));
    fill_discrete(samples, |c| c.drs, |c, v| c.drs = Some(v));
    fill_discrete(samples, |c| c.status, |c, v| c.status = Some(v));
}

fn fill_continuous(
    samples: &mut [TimedSample],
    get: fn(&Channels) -> Option<f64>,
    set: fn(&mut Channels, f64),
) {
    let known: Vec<(usize, f64, f64)> = samples
        .iter()
        .enumerate()
        .filter_map(|(i, s)| get(&s.channels).map(|v| (i, s.session_time.as_secs_f64(), v)))
        .collect();
    if known.is_empty() {
        return;
    }

    let mut next = 0usize;
    for i in 0..samples.len() {
        if get(&samples[i].channels).is_some() {
            continue;
        }
        while next < known.len() && known[next].0 < i {
            next += 1;
        }

        let value = if next == 0 {
            known[0].2
        } else if next == known.len() {
            known[known.len() - 1].2
        } else {
            let (_, t0, v0) = known[next - 1];
            let (_, t1, v1) = known[next];
            let t = samples[i].session_time.as_secs_f64();
            if t1 > t0 { v0 + (v1 - v0) * (t - t0) / (t1 - t0) } else { v0 }
        };
        set(&mut samples[i].channels, value);
    }
}

fn fill_discrete<T: Copy>(
    samples: &mut [TimedSample],
    get: fn(&Channels) -> Option<T>,
    set: fn(&mut Channels, T),
) {
    let mut last: Option<T> = None;
    for sample in samples.iter_mut() {
        match get(&sample.channels) {
            Some(v) => last = Some(v),
            None => {
                if let Some(v) = last {
                    set(&mut sample.channels, v);
                }
            }
        }
    }

    // backward fill for the leading gap only
    let mut first: Option<T> = None;
    for sample in samples.iter_mut() {
        match get(&sample.channels) {
            Some(v) => {
                first = Some(v);
                break;
            }
            None => continue,
        }
    }
    if let Some(v) = first {
        for sample in samples.iter_mut() {
            if get(&sample.channels).is_some() {
                break;
            }
            set(&mut sample.channels, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockModel, SessionTime};
    use crate::telemetry::sample::{CarStatus, Source};

    fn clock() -> ClockModel {
        ClockModel::new(
            chrono::NaiveDate::from_ymd_opt(2020, 9, 6)
                .unwrap()
                .and_hms_milli_opt(12, 40, 0, 196)
                .unwrap()
                .and_utc(),
        )
    }

    fn car_stream() -> TelemetryStream {
        TelemetryStream::from_readings(
            clock(),
            Source::Car,
            vec![
                (
                    SessionTime::from_millis(1000),
                    Channels { speed: Some(100.0), gear: Some(3), ..Default::default() },
                ),
                (
                    SessionTime::from_millis(3000),
                    Channels { speed: Some(200.0), gear: Some(5), ..Default::default() },
                ),
            ],
        )
    }

    fn pos_stream() -> TelemetryStream {
        TelemetryStream::from_readings(
            clock(),
            Source::Pos,
            vec![
                (
                    SessionTime::from_millis(2000),
                    Channels {
                        x: Some(10.0),
                        y: Some(-5.0),
                        status: Some(CarStatus::OnTrack),
                        ..Default::default()
                    },
                ),
                (
                    SessionTime::from_millis(4000),
                    Channels {
                        x: Some(20.0),
                        y: Some(-15.0),
                        status: Some(CarStatus::OnTrack),
                        ..Default::default()
                    },
                ),
            ],
        )
    }

    #[test]
    fn output_is_ordered_with_all_samples() {
        let merged = merge(&car_stream(), &pos_stream()).unwrap();
        let times: Vec<_> = merged.samples().iter().map(|s| s.session_time).collect();
        assert_eq!(
            times,
            vec![
                SessionTime::from_millis(1000),
                SessionTime::from_millis(2000),
                SessionTime::from_millis(3000),
                SessionTime::from_millis(4000),
            ]
        );
    }

    #[test]
    fn ties_keep_input_order_a_before_b() {
        let a = TelemetryStream::from_readings(
            clock(),
            Source::Car,
            vec![(SessionTime::from_millis(1000), Channels { speed: Some(1.0), ..Default::default() })],
        );
        let b = TelemetryStream::from_readings(
            clock(),
            Source::Pos,
            vec![(SessionTime::from_millis(1000), Channels { x: Some(2.0), ..Default::default() })],
        );

        let merged = merge(&a, &b).unwrap();
        assert_eq!(merged.samples()[0].source, Source::Car);
        assert_eq!(merged.samples()[1].source, Source::Pos);
    }

    #[test]
    fn continuous_gaps_are_interpolated_linearly() {
        let merged = merge(&car_stream(), &pos_stream()).unwrap();
        // Pos sample at t=2000 sits halfway between car samples at 1000/3000.
        let pos_sample = &merged.samples()[1];
        assert_eq!(pos_sample.channels.speed, Some(150.0));
        // Car sample at t=3000 sits halfway between pos samples at 2000/4000.
        let car_sample = &merged.samples()[2];
        assert_eq!(car_sample.channels.x, Some(15.0));
        assert_eq!(car_sample.channels.y, Some(-10.0));
    }

    #[test]
    fn discrete_gaps_are_filled_not_interpolated() {
        let merged = merge(&car_stream(), &pos_stream()).unwrap();
        // Pos sample at t=2000 carries the previous gear, never gear 4.
        assert_eq!(merged.samples()[1].channels.gear, Some(3));
        // Leading gap: car sample at t=1000 gets the first known status.
        assert_eq!(merged.samples()[0].channels.status, Some(CarStatus::OnTrack));
        // Trailing gap: pos sample at t=4000 keeps the last known gear.
        assert_eq!(merged.samples()[3].channels.gear, Some(5));
    }

    #[test]
    fn originals_are_not_altered() {
        let a = car_stream();
        let b = pos_stream();
        let merged = merge(&a, &b).unwrap();

        let from_a: Vec<_> =
            merged.samples().iter().filter(|s| s.source == Source::Car).collect();
        assert_eq!(from_a.len(), a.len());
        for (merged_sample, original) in from_a.iter().zip(a.samples()) {
            assert_eq!(merged_sample.session_time, original.session_time);
            assert_eq!(merged_sample.date, original.date);
            // measured values carried through untouched
            assert_eq!(merged_sample.channels.speed, original.channels.speed);
            assert_eq!(merged_sample.channels.gear, original.channels.gear);
        }
    }

    #[test]
    fn merged_time_is_rebased() {
        let merged = merge(&car_stream(), &pos_stream()).unwrap();
        assert_eq!(merged.samples()[0].time, std::time::Duration::ZERO);
        assert_eq!(merged.samples()[1].time, std::time::Duration::from_millis(1000));
    }

    #[test]
    fn mismatched_clocks_are_rejected() {
        let other_clock = ClockModel::new(clock().t0() + chrono::TimeDelta::seconds(1));
        let b = TelemetryStream::from_readings(other_clock, Source::Pos, Vec::new());
        assert!(merge(&car_stream(), &b).is_err());
    }

    #[test]
    fn merge_is_deterministic() {
        let once = merge(&car_stream(), &pos_stream()).unwrap();
        let twice = merge(&car_stream(), &pos_stream()).unwrap();
        assert_eq!(once, twice);
    }
}
