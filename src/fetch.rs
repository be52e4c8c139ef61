//! Cache-aware fetching from the upstream live-data service.
//!
//! The fetcher composes the cache store and the rate limiter in a fixed
//! order: the cache is always checked before a rate-limit permit is
//! acquired, so requests served from the cache never consume budget. One
//! true network fetch produces exactly one durable cache write; cache hits
//! produce none.
//!
//! The fetcher never retries. Transient failures are propagated as
//! retryable errors for the orchestrator to decide on, and hard rate-limit
//! rejections from upstream pass through unmodified.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore, RequestDescriptor};
use crate::error::{DataError, Result};
use crate::limit::RateLimiter;

/// Version of the cached payload shape. Bumped whenever the stored format
/// changes incompatibly; older entries then read as misses and are
/// refetched.
pub const SCHEMA_VERSION: u32 = 1;

/// Network collaborator that performs the actual upstream request.
///
/// Implementations live outside this crate (HTTP client, live-timing replay,
/// test doubles). A hard rate-limit rejection by the upstream service must
/// be reported as [`DataError::RateLimitExceeded`] so it is distinguishable
/// from other transport failures.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, descriptor: &RequestDescriptor) -> Result<Vec<u8>>;
}

/// Fetcher configuration flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Serve from cache only; a miss fails with
    /// [`DataError::UnavailableOffline`] instead of going to the network.
    pub offline: bool,
    /// Ignore existing cached entries and refetch.
    pub force_refresh: bool,
    /// Expected cache schema version.
    pub schema_version: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig { offline: false, force_refresh: false, schema_version: SCHEMA_VERSION }
    }
}

/// Orchestrates fingerprint → cache → rate limit → network → validate →
/// store.
///
/// All collaborators are injected; there is no process-wide singleton
/// state, so independent fetchers can be constructed for tests or for
/// separate cache locations while still sharing one limiter.
pub struct Fetcher {
    store: Arc<dyn CacheStore>,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn CacheStore>,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        config: FetchConfig,
    ) -> Self {
        Fetcher { store, limiter, transport, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch one payload, serving from cache when possible.
    pub async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
        let key = CacheKey::derive(descriptor, self.config.schema_version);

        if !self.config.force_refresh
            && let Some(entry) = self.store.get(&key).await?
        {
            info!(endpoint = descriptor.normalized_endpoint(), "using cached data");
            return Ok(entry.payload);
        }

        if self.config.offline {
            return Err(DataError::unavailable_offline(descriptor.normalized_endpoint()));
        }

        debug!(endpoint = descriptor.normalized_endpoint(), "no cached data, loading");
        let _permit = self.limiter.acquire().await?;
        let payload = self.transport.perform(descriptor).await?;
        validate_payload(descriptor, &payload)?;

        self.store.put(&key, payload.clone(), self.config.schema_version).await?;
        debug!(endpoint = descriptor.normalized_endpoint(), "data written to cache");
        Ok(payload)
    }

    /// Like [`fetch`](Self::fetch), but abandoned when `cancel` fires.
    ///
    /// Cancellation never leaves a partial cache entry behind: the store
    /// write only starts after the full payload has arrived, and the write
    /// itself is atomic.
    pub async fn fetch_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(endpoint = descriptor.normalized_endpoint(), "fetch cancelled");
                Err(DataError::transport("fetch cancelled by caller", false))
            }
            result = self.fetch(descriptor) => result,
        }
    }

    /// Fetch several independent payloads concurrently.
    ///
    /// Failures are isolated per descriptor so one driver's broken data
    /// does not abort the others. The exception is a hard rate-limit
    /// rejection, which cancels the remaining fetches since continuing
    /// would only produce more of the same.
    pub async fn fetch_all(&self, descriptors: &[RequestDescriptor]) -> Vec<Result<Vec<u8>>> {
        let cancel = CancellationToken::new();

        let tasks = descriptors.iter().map(|descriptor| {
            let cancel = cancel.clone();
            async move {
                let result = self.fetch_with_cancel(descriptor, &cancel).await;
                if matches!(result, Err(DataError::RateLimitExceeded { .. })) {
                    warn!("rate limit exceeded, cancelling remaining fetches");
                    cancel.cancel();
                }
                result
            }
        });

        futures::future::join_all(tasks).await
    }
}

/// Minimal payload shape validation: non-empty, and syntactically valid
/// JSON when it looks like a JSON document. Deeper validation belongs to
/// the parsers consuming the payload.
fn validate_payload(descriptor: &RequestDescriptor, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(DataError::parse(descriptor.normalized_endpoint(), "empty response payload"));
    }
    if matches!(payload.first(), Some(b'{') | Some(b'[')) {
        serde_json::from_slice::<serde::de::IgnoredAny>(payload).map_err(|e| {
            DataError::parse(descriptor.normalized_endpoint(), format!("invalid JSON: {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::limit::{RateLimitConfig, RateLimitMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticTransport {
        calls: AtomicUsize,
        response: Result<Vec<u8>, String>,
    }

    impl StaticTransport {
        fn ok(payload: &[u8]) -> Self {
            StaticTransport { calls: AtomicUsize::new(0), response: Ok(payload.to_vec()) }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn perform(&self, _descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(payload) => Ok(payload.clone()),
                Err(reason) => Err(DataError::transport(reason.clone(), true)),
            }
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(
            RateLimiter::new(RateLimitConfig {
                window: Duration::from_secs(60),
                max_requests: 100,
                mode: RateLimitMode::Soft,
                min_interval: None,
            })
            .unwrap(),
        )
    }

    fn fetcher(transport: Arc<StaticTransport>, config: FetchConfig) -> Fetcher {
        Fetcher::new(Arc::new(MemoryStore::new()), limiter(), transport, config)
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let transport = Arc::new(StaticTransport::ok(b"{\"laps\": []}"));
        let fetcher = fetcher(Arc::clone(&transport), FetchConfig::default());
        let desc = RequestDescriptor::new("timing_data").with_param("session", "R");

        let first = fetcher.fetch(&desc).await.unwrap();
        let second = fetcher.fetch(&desc).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 1, "second call must not reach the network");
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let transport = Arc::new(StaticTransport::ok(b"payload"));
        let fetcher = fetcher(
            Arc::clone(&transport),
            FetchConfig { force_refresh: true, ..FetchConfig::default() },
        );
        let desc = RequestDescriptor::new("car_data");

        fetcher.fetch(&desc).await.unwrap();
        fetcher.fetch(&desc).await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn offline_miss_is_descriptive() {
        let transport = Arc::new(StaticTransport::ok(b"payload"));
        let fetcher = fetcher(
            Arc::clone(&transport),
            FetchConfig { offline: true, ..FetchConfig::default() },
        );
        let desc = RequestDescriptor::new("pos_data");

        let err = fetcher.fetch(&desc).await.unwrap_err();
        assert!(matches!(err, DataError::UnavailableOffline { .. }));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn offline_hit_is_served() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(StaticTransport::ok(b"payload"));

        let online = Fetcher::new(
            Arc::clone(&store),
            limiter(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            FetchConfig::default(),
        );
        let desc = RequestDescriptor::new("session_status");
        online.fetch(&desc).await.unwrap();

        let offline = Fetcher::new(
            store,
            limiter(),
            transport.clone(),
            FetchConfig { offline: true, ..FetchConfig::default() },
        );
        assert_eq!(offline.fetch(&desc).await.unwrap(), b"payload");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_writes_nothing() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(StaticTransport {
            calls: AtomicUsize::new(0),
            response: Err("connection reset".into()),
        });
        let fetcher = Fetcher::new(
            Arc::clone(&store),
            limiter(),
            transport,
            FetchConfig::default(),
        );
        let desc = RequestDescriptor::new("weather_data");

        let err = fetcher.fetch(&desc).await.unwrap_err();
        assert!(err.is_retryable());

        let key = CacheKey::derive(&desc, SCHEMA_VERSION);
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_and_not_cached() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(StaticTransport::ok(b"{\"unterminated\": "));
        let fetcher =
            Fetcher::new(Arc::clone(&store), limiter(), transport, FetchConfig::default());
        let desc = RequestDescriptor::new("timing_app_data");

        let err = fetcher.fetch(&desc).await.unwrap_err();
        assert!(matches!(err, DataError::Parse { .. }));

        let key = CacheKey::derive(&desc, SCHEMA_VERSION);
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_fetch_writes_nothing() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(StaticTransport::ok(b"payload"));
        let fetcher = Fetcher::new(
            Arc::clone(&store),
            limiter(),
            transport,
            FetchConfig::default(),
        );
        let desc = RequestDescriptor::new("race_control_messages");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher.fetch_with_cancel(&desc, &cancel).await.unwrap_err();
        assert!(!err.is_retryable() || matches!(err, DataError::Transport { .. }));

        let key = CacheKey::derive(&desc, SCHEMA_VERSION);
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_all_isolates_failures() {
        struct PerEndpointTransport;

        #[async_trait]
        impl Transport for PerEndpointTransport {
            async fn perform(&self, descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
                if descriptor.endpoint.contains("broken") {
                    Err(DataError::transport("server error", true))
                } else {
                    Ok(b"ok".to_vec())
                }
            }
        }

        let fetcher = Fetcher::new(
            Arc::new(MemoryStore::new()),
            limiter(),
            Arc::new(PerEndpointTransport),
            FetchConfig::default(),
        );

        let descriptors = vec![
            RequestDescriptor::new("car_data").with_param("driver", "44"),
            RequestDescriptor::new("broken").with_param("driver", "16"),
            RequestDescriptor::new("car_data").with_param("driver", "77"),
        ];
        let results = fetcher.fetch_all(&descriptors).await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn fetch_all_aborts_on_hard_rate_limit() {
        let transport = Arc::new(StaticTransport::ok(b"payload"));
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig {
                window: Duration::from_secs(3600),
                max_requests: 1,
                mode: RateLimitMode::Hard,
                min_interval: None,
            })
            .unwrap(),
        );
        let fetcher = Fetcher::new(
            Arc::new(MemoryStore::new()),
            limiter,
            Arc::clone(&transport) as Arc<dyn Transport>,
            FetchConfig::default(),
        );

        let descriptors: Vec<_> = ["44", "16", "1", "63"]
            .iter()
            .map(|driver| RequestDescriptor::new("car_data").with_param("driver", *driver))
            .collect();
        let results = fetcher.fetch_all(&descriptors).await;

        // one request fits the budget; the rest fail without being sent
        let granted = results.iter().filter(|r| r.is_ok()).count();
        assert!(granted <= 1);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 4 - granted);
        assert!(results.iter().any(|r| {
            matches!(r, Err(DataError::RateLimitExceeded { .. }))
        }));
        assert_eq!(transport.call_count(), granted, "aborted fetches must not reach the network");
    }
}
