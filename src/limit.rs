//! Request rate limiting.
//!
//! Rate limits apply to requests that actually reach the network; cache hits
//! bypass the limiter entirely. The limits exist because some upstream
//! services are run by individuals free of charge: exceeding them can get
//! everybody blocked, so the budget is enforced locally before a request is
//! ever sent.
//!
//! Two rules can be active at once, matching how the live-data services
//! publish their limits:
//!
//! - a minimum interval between consecutive requests (always waited out),
//! - a fixed window budget of at most N requests per W seconds. In
//!   [`RateLimitMode::Soft`] an exhausted window suspends the caller until
//!   the window rolls over; in [`RateLimitMode::Hard`] it fails immediately
//!   with [`DataError::RateLimitExceeded`], leaving any retry decision to
//!   the caller.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{DataError, Result};

/// Behavior when the window budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// Block the caller until the next window opens; no request is dropped.
    Soft,
    /// Fail immediately without retrying.
    Hard,
}

/// Rate limit configuration. Exact numbers are configuration, not policy
/// baked into the limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed window duration.
    pub window: Duration,
    /// Maximum number of requests per window.
    pub max_requests: u32,
    /// Behavior on window exhaustion.
    pub mode: RateLimitMode,
    /// Optional minimum spacing between consecutive requests.
    pub min_interval: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Matches the published limits of the historical live-data service:
        // 200 calls/h with 250 ms spacing.
        RateLimitConfig {
            window: Duration::from_secs(60 * 60),
            max_requests: 200,
            mode: RateLimitMode::Soft,
            min_interval: Some(Duration::from_millis(250)),
        }
    }
}

/// Proof that one unit of request budget was consumed.
#[derive(Debug)]
pub struct Permit {
    acquired_at: Instant,
}

impl Permit {
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

/// Mutable window state. Owned exclusively by [`RateLimiter`]; all
/// mutations go through its mutex.
#[derive(Debug)]
struct RateBudget {
    window_start: Instant,
    consumed: u32,
    last_request: Option<Instant>,
}

/// Enforces a maximum request rate to the upstream service.
///
/// Shared by all fetch tasks of a process via `Arc`; the internal mutex
/// serializes budget mutations so concurrent callers cannot jointly exceed
/// the limit.
pub struct RateLimiter {
    config: RateLimitConfig,
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        if config.window.is_zero() {
            return Err(DataError::Config { reason: "rate limit window must be non-zero".into() });
        }
        if config.max_requests == 0 {
            return Err(DataError::Config {
                reason: "rate limit must allow at least one request per window".into(),
            });
        }
        Ok(RateLimiter {
            config,
            budget: Mutex::new(RateBudget {
                window_start: Instant::now(),
                consumed: 0,
                last_request: None,
            }),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one unit of request budget.
    ///
    /// May suspend the calling task (min-interval spacing, or soft-mode
    /// window exhaustion). The budget lock is never held across a
    /// suspension; after sleeping, the budget is re-checked because another
    /// task may have consumed the fresh window in the meantime.
    pub async fn acquire(&self) -> Result<Permit> {
        loop {
            let wait = {
                let mut budget = self.budget.lock().await;
                let now = Instant::now();

                if now.duration_since(budget.window_start) >= self.config.window {
                    budget.window_start = now;
                    budget.consumed = 0;
                }

                if let Some(min_interval) = self.config.min_interval
                    && let Some(last) = budget.last_request
                {
                    let since_last = now.duration_since(last);
                    if since_last < min_interval {
                        min_interval - since_last
                    } else {
                        match self.try_consume(&mut budget, now)? {
                            Some(permit) => return Ok(permit),
                            None => self.time_to_rollover(&budget, now),
                        }
                    }
                } else {
                    match self.try_consume(&mut budget, now)? {
                        Some(permit) => return Ok(permit),
                        None => self.time_to_rollover(&budget, now),
                    }
                }
            };

            debug!(wait = ?wait, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    fn try_consume(&self, budget: &mut RateBudget, now: Instant) -> Result<Option<Permit>> {
        if budget.consumed < self.config.max_requests {
            budget.consumed += 1;
            budget.last_request = Some(now);
            return Ok(Some(Permit { acquired_at: now }));
        }
        match self.config.mode {
            RateLimitMode::Soft => Ok(None),
            RateLimitMode::Hard => Err(DataError::rate_limit_exceeded(format!(
                "{} requests per {:?}",
                self.config.max_requests, self.config.window
            ))),
        }
    }

    fn time_to_rollover(&self, budget: &RateBudget, now: Instant) -> Duration {
        (budget.window_start + self.config.window).saturating_duration_since(now)
    }
}
