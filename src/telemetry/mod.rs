//! Telemetry streams: samples, merging and slicing.

mod merge;
mod sample;
mod slice;

pub use merge::{PresentationStream, merge};
pub use sample::{CarStatus, Channels, Source, TelemetryStream, TimedSample};
pub use slice::{Pad, slice_by_lap, slice_by_time};
