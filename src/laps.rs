//! Lap records and lap accuracy classification.
//!
//! Accuracy validation is a simple yes/no check over the information the
//! timing feed provides; it cannot catch every problem. A lap counts as
//! accurate only when it is a full racing lap (no pit in/out), ran entirely
//! under green or yellow, did not immediately follow a safety-car or
//! virtual-safety-car period, and its recorded lap time is consistent with
//! its sector times.
//!
//! Sector-sum mismatches beyond the tolerance are surfaced separately as
//! [`IntegrityFault`]s and logged, so data-quality problems can be told
//! apart from ordinary inaccuracy (an out-lap is inaccurate but not
//! faulty).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::clock::SessionTime;

/// Tolerance for lap-time consistency checks.
///
/// The sum of the three sector times rarely matches the recorded lap time
/// bit-for-bit; 3 ms covers the rounding observed in the feed.
pub const ACCURACY_TOLERANCE: Duration = Duration::from_millis(3);

/// Track status codes as published by the race control feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    AllClear,
    Yellow,
    SafetyCar,
    Red,
    VirtualSafetyCar,
    VscEnding,
}

impl TrackStatus {
    /// Parse the feed's single-character status code.
    pub fn from_code(code: &str) -> Option<TrackStatus> {
        match code {
            "1" => Some(TrackStatus::AllClear),
            "2" => Some(TrackStatus::Yellow),
            "4" => Some(TrackStatus::SafetyCar),
            "5" => Some(TrackStatus::Red),
            "6" => Some(TrackStatus::VirtualSafetyCar),
            "7" => Some(TrackStatus::VscEnding),
            _ => None,
        }
    }

    /// Statuses under which a lap can still be considered accurate.
    pub fn allows_accurate_lap(self) -> bool {
        matches!(self, TrackStatus::AllClear | TrackStatus::Yellow)
    }

    /// Whether this status is part of a safety-car or VSC period.
    pub fn is_safety_car_period(self) -> bool {
        matches!(
            self,
            TrackStatus::SafetyCar | TrackStatus::VirtualSafetyCar | TrackStatus::VscEnding
        )
    }
}

/// One contiguous interval of a track status, in session time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStatusInterval {
    pub start: SessionTime,
    pub end: SessionTime,
    pub status: TrackStatus,
}

impl TrackStatusInterval {
    /// Half-open overlap with a lap's `[start, end]` window.
    fn overlaps(&self, start: SessionTime, end: SessionTime) -> bool {
        self.start < end && self.end > start
    }
}

/// One lap of one driver, as parsed from the timing feed.
///
/// The sector and pit session times are inputs to slicing and
/// classification; this crate only ever computes and attaches
/// `is_accurate`. Deletion flags come from race control decisions and are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub driver: String,
    pub number: u32,
    /// Session time at which the lap started.
    pub start: SessionTime,
    /// Session time at which the lap ended (the timing line crossing).
    pub end: SessionTime,
    /// Recorded lap duration.
    pub lap_time: Option<Duration>,
    pub sector1: Option<Duration>,
    pub sector2: Option<Duration>,
    pub sector3: Option<Duration>,
    pub pit_in: Option<SessionTime>,
    pub pit_out: Option<SessionTime>,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
    /// Computed by [`classify`]; `false` until classification ran.
    pub is_accurate: bool,
}

/// Data-integrity problem found while classifying a lap.
///
/// Not an error: the lap is still classified (as inaccurate) and processing
/// continues. Logged separately so feed problems stand out from ordinary
/// inaccuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFault {
    /// The three sector times do not add up to the recorded lap time.
    SectorSumMismatch { lap_time: Duration, sector_sum: Duration },
    /// The gap between consecutive lap end times contradicts the recorded
    /// lap time.
    LapTimeGapMismatch { lap_time: Duration, gap: Duration },
}

impl fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFault::SectorSumMismatch { lap_time, sector_sum } => write!(
                f,
                "sector sum {sector_sum:?} does not match lap time {lap_time:?}"
            ),
            IntegrityFault::LapTimeGapMismatch { lap_time, gap } => write!(
                f,
                "lap end gap {gap:?} does not match lap time {lap_time:?}"
            ),
        }
    }
}

/// Result of classifying one lap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub accurate: bool,
    pub faults: Vec<IntegrityFault>,
}

/// Classify one lap as accurate or inaccurate.
///
/// Pure: no inputs are mutated; integrity faults are returned (and logged)
/// rather than raised. `previous` is the same driver's directly preceding
/// lap, when there is one.
pub fn classify(
    lap: &Lap,
    track_status: &[TrackStatusInterval],
    previous: Option<&Lap>,
) -> Classification {
    let mut faults = Vec::new();

    let overlapping: Vec<TrackStatus> = track_status
        .iter()
        .filter(|interval| interval.overlaps(lap.start, lap.end))
        .map(|interval| interval.status)
        .collect();

    // Full racing lap with complete timing, entirely under green/yellow.
    let base_ok = lap.pit_in.is_none()
        && lap.pit_out.is_none()
        && lap.lap_time.is_some()
        && lap.sector1.is_some()
        && lap.sector2.is_some()
        && lap.sector3.is_some()
        && !overlapping.is_empty()
        && overlapping.iter().all(|status| status.allows_accurate_lap());

    // Sector sum must reproduce the recorded lap time.
    let sectors_ok = match (lap.lap_time, lap.sector1, lap.sector2, lap.sector3) {
        (Some(lap_time), Some(s1), Some(s2), Some(s3)) => {
            let sector_sum = s1 + s2 + s3;
            if within_tolerance(sector_sum, lap_time) {
                true
            } else {
                faults.push(IntegrityFault::SectorSumMismatch { lap_time, sector_sum });
                false
            }
        }
        _ => false, // data not available means fail
    };

    // The first lap after a safety-car or VSC period has unreliable timing,
    // as do all laps during one (those already fail the status check).
    let restart_ok = match previous {
        Some(prev) => !track_status
            .iter()
            .filter(|interval| interval.overlaps(prev.start, prev.end))
            .any(|interval| interval.status.is_safety_car_period()),
        None => true,
    };

    // Consecutive lap end times must agree with the recorded lap time.
    let gap_ok = match (previous, lap.lap_time) {
        (Some(prev), Some(lap_time)) => {
            let gap = lap.end.saturating_sub(prev.end);
            if within_tolerance(gap, lap_time) {
                true
            } else {
                faults.push(IntegrityFault::LapTimeGapMismatch { lap_time, gap });
                false
            }
        }
        _ => true,
    };

    for fault in &faults {
        warn!(driver = %lap.driver, lap = lap.number, %fault, "lap timing integrity fault");
    }

    Classification { accurate: base_ok && sectors_ok && restart_ok && gap_ok, faults }
}

/// Classify one driver's laps in order, attaching the accuracy flag.
///
/// Returns the per-lap classifications. A single malformed lap never aborts
/// the others; integrity faults are summarized in one warning per driver.
pub fn classify_all(
    laps: &mut [Lap],
    track_status: &[TrackStatusInterval],
) -> Vec<Classification> {
    let mut results = Vec::with_capacity(laps.len());
    for i in 0..laps.len() {
        let previous = if i > 0 { Some(&laps[i - 1]) } else { None };
        results.push(classify(&laps[i], track_status, previous));
    }
    for (lap, classification) in laps.iter_mut().zip(&results) {
        lap.is_accurate = classification.accurate;
    }

    if let Some(driver) = laps.first().map(|lap| lap.driver.clone()) {
        let integrity_errors =
            results.iter().filter(|c| !c.faults.is_empty()).count();
        if integrity_errors > 0 {
            warn!(
                driver = %driver,
                laps = integrity_errors,
                "lap timing integrity check failed"
            );
        }
    }
    results
}

fn within_tolerance(a: Duration, b: Duration) -> bool {
    let diff = if a >= b { a - b } else { b - a };
    diff <= ACCURACY_TOLERANCE
}
