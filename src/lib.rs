//! Caching, rate limiting and time-base reconciliation for live motorsport
//! timing data.
//!
//! Paddock sits between analysis code and a live-data service with
//! inconsistent sampling rates and multiple incompatible time references.
//! It provides:
//!
//! - **Persistent request caching**: deterministic fingerprints, schema
//!   versioning and durable storage, so repeated analysis runs never
//!   refetch what they already have
//! - **Rate limiting**: soft throttling and hard limits enforced before a
//!   request reaches the network; cache hits are free
//! - **Time-base reconciliation**: one session clock tying together
//!   absolute, session-relative and slice-relative time
//! - **Stream merging and lap slicing**: aligning independently sampled
//!   vehicle and position telemetry without corrupting the originals
//! - **Lap accuracy classification**: flagging laps whose timing cannot be
//!   trusted
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use paddock::{Paddock, PaddockConfig, RequestDescriptor, Transport};
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> paddock::Result<()> {
//! let fetcher = Paddock::fetcher(PaddockConfig::default(), transport).await?;
//!
//! let descriptor = RequestDescriptor::new("static/2020/car_data")
//!     .with_param("driver", "44");
//! let payload = fetcher.fetch(&descriptor).await?;
//! # let _ = payload;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod clock;
mod config;
mod error;

// Request pipeline
pub mod cache;
pub mod fetch;
pub mod limit;

// Reconciliation
pub mod laps;
pub mod telemetry;

// Core exports
pub use clock::{ClockModel, SessionTime};
pub use config::{CACHE_DIR_ENV, PaddockConfig, default_cache_dir};
pub use error::{DataError, Result};

// Request pipeline exports
pub use cache::{CacheEntry, CacheKey, CacheStore, FsStore, MemoryStore, RequestDescriptor};
pub use fetch::{FetchConfig, Fetcher, SCHEMA_VERSION, Transport};
pub use limit::{RateLimitConfig, RateLimitMode, RateLimiter};

// Reconciliation exports
pub use laps::{Classification, IntegrityFault, Lap, TrackStatus, TrackStatusInterval};
pub use telemetry::{
    CarStatus, Channels, Pad, PresentationStream, Source, TelemetryStream, TimedSample,
};

use std::sync::Arc;

/// Entry point wiring up the default component stack.
///
/// Components can always be constructed and combined individually; this
/// factory covers the common case of a filesystem-backed cache and a single
/// shared rate limiter.
///
/// # Example
///
/// ```rust,no_run
/// use paddock::{Paddock, PaddockConfig};
/// # use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn paddock::Transport>) -> paddock::Result<()> {
/// let config = PaddockConfig { offline: true, ..PaddockConfig::default() };
/// let fetcher = Paddock::fetcher(config, transport).await?;
/// # let _ = fetcher;
/// # Ok(())
/// # }
/// ```
pub struct Paddock;

impl Paddock {
    /// Build a [`Fetcher`] over a filesystem cache store at the configured
    /// location and a fresh rate limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or the
    /// rate limit configuration is degenerate.
    pub async fn fetcher(config: PaddockConfig, transport: Arc<dyn Transport>) -> Result<Fetcher> {
        let store = Arc::new(FsStore::open(&config.cache_dir).await?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone())?);
        Ok(Fetcher::new(store, limiter, transport, config.fetch_config()))
    }
}
