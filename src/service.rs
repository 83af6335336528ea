//! Manifest generation service
//!
//! Composes admission, checkout, fingerprinting, the failure-aware cache and
//! renderer dispatch for one request at a time.

use crate::cache::{
    BreakerDecision, BreakerPolicy, CacheEntry, Clock, FailureRecord, Fingerprint, InMemoryCache,
    KeyedLocks, ManifestCache, SystemClock,
};
use crate::config::Config;
use crate::error::{RepoServeError, RepoServeResult};
use crate::limiter::ConcurrencyLimiter;
use crate::render::{ManifestSet, RenderContext, Renderer, ToolAdapter};
use crate::repo::RepoCheckout;
use crate::source::ManifestRequest;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Manifest generation entry point
#[derive(Clone)]
pub struct ManifestService {
    checkout: Arc<dyn RepoCheckout>,
    renderer: Arc<Renderer>,
    cache: Arc<dyn ManifestCache>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    limiter: ConcurrencyLimiter,
    policy: BreakerPolicy,
    allowed_schemes: Arc<[String]>,
}

impl ManifestService {
    /// Create a service with an in-memory cache and the system clock
    pub fn new(checkout: Arc<dyn RepoCheckout>, tool: Arc<dyn ToolAdapter>, config: &Config) -> Self {
        let policy = config.generation.policy();
        Self {
            checkout,
            renderer: Arc::new(Renderer::new(tool, config.plugins.clone())),
            cache: Arc::new(InMemoryCache::new()),
            clock: Arc::new(SystemClock),
            locks: Arc::new(KeyedLocks::new()),
            limiter: ConcurrencyLimiter::new(policy.parallelism_limit),
            policy,
            allowed_schemes: config.sandbox.allowed_schemes.clone().into(),
        }
    }

    /// Use `cache` instead of the in-memory default
    pub fn with_cache(mut self, cache: Arc<dyn ManifestCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Use `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Generate manifests for `request`.
    ///
    /// The work runs in its own task, so a caller that stops waiting does not
    /// stop the write-through.
    pub async fn generate_manifest(&self, request: ManifestRequest) -> RepoServeResult<ManifestSet> {
        let service = self.clone();
        tokio::spawn(async move { service.generate(request).await })
            .await
            .map_err(|e| RepoServeError::Internal(format!("generation task failed: {}", e)))?
    }

    async fn generate(self, request: ManifestRequest) -> RepoServeResult<ManifestSet> {
        let permit = self.limiter.acquire().await?;

        let checkout = self
            .checkout
            .checkout(&request.repo, request.effective_revision())
            .await?;
        let revision = match request.remote_chart() {
            Some(chart) => {
                self.renderer
                    .resolve_chart_version(request.repo_url(), chart, request.effective_revision())
                    .await?
            }
            None => checkout.revision.clone(),
        };

        let schemes = request
            .values_file_schemes
            .clone()
            .unwrap_or_else(|| self.allowed_schemes.to_vec());
        let key = Fingerprint::compute(&request, &revision, &schemes)?;

        let ctx = RenderContext {
            checkout: &checkout,
            request: &request,
            revision: &revision,
            allowed_schemes: &schemes,
        };

        let result = {
            let _guard = self.locks.lock(&key).await;
            self.generate_locked(&key, &ctx).await
        };
        drop(permit);

        let mut set = result?;
        if request.verify_signature {
            set.verify_result = Some(self.checkout.verify_signature(&checkout).await?);
        }
        Ok(set)
    }

    /// Cache lookup, render and write-through under the fingerprint lock
    async fn generate_locked(
        &self,
        key: &Fingerprint,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<ManifestSet> {
        if ctx.request.no_cache {
            debug!(fingerprint = %key.short(), "Cache read skipped");
        } else if let Some(cached) = self.read_cache(key).await {
            return cached;
        }

        let rendered = match self.renderer.detect(ctx).await {
            Ok(kind) => self.renderer.render(kind, ctx).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.write_through(key, &rendered).await {
            warn!(fingerprint = %key.short(), error = %e, "Cache write failed");
        }
        rendered
    }

    /// Serve from the cache, or `None` when a fresh render is needed
    async fn read_cache(&self, key: &Fingerprint) -> Option<RepoServeResult<ManifestSet>> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(fingerprint = %key.short(), error = %e, "Cache read failed");
                return None;
            }
        };

        match entry {
            CacheEntry::Manifests(set) => {
                debug!(fingerprint = %key.short(), "Manifest cache hit");
                Some(Ok(set))
            }
            CacheEntry::Failure(mut record) => {
                match record.evaluate(&self.policy, self.clock.now()) {
                    BreakerDecision::Retry => {
                        debug!(
                            fingerprint = %key.short(),
                            failures = record.consecutive_failures,
                            "Below failure threshold, regenerating"
                        );
                        None
                    }
                    BreakerDecision::Reset => {
                        info!(fingerprint = %key.short(), "Generation pause expired, regenerating");
                        if let Err(e) = self.cache.delete(key).await {
                            warn!(fingerprint = %key.short(), error = %e, "Cache delete failed");
                        }
                        None
                    }
                    BreakerDecision::Replay(message) => {
                        debug!(
                            fingerprint = %key.short(),
                            served = record.cached_responses_returned,
                            "Returning cached generation error"
                        );
                        if let Err(e) = self.cache.set(key, CacheEntry::Failure(record)).await {
                            warn!(fingerprint = %key.short(), error = %e, "Cache write failed");
                        }
                        Some(Err(RepoServeError::BreakerThrottled(message)))
                    }
                }
            }
        }
    }

    /// Record a render outcome. Transient failures leave the cache untouched.
    async fn write_through(
        &self,
        key: &Fingerprint,
        result: &RepoServeResult<ManifestSet>,
    ) -> RepoServeResult<()> {
        let entry = match result {
            Ok(set) => CacheEntry::Manifests(set.clone()),
            Err(e) if e.is_transient() => {
                debug!(fingerprint = %key.short(), "Transient failure not cached");
                return Ok(());
            }
            Err(e) => {
                let record = match self.cache.get(key).await? {
                    Some(CacheEntry::Failure(mut record)) => {
                        record.record_failure(e.to_string());
                        record
                    }
                    _ => FailureRecord::new(e.to_string(), self.clock.now()),
                };
                if record.is_paused(&self.policy) {
                    warn!(
                        fingerprint = %key.short(),
                        failures = record.consecutive_failures,
                        "Pausing manifest generation after repeated failures"
                    );
                }
                CacheEntry::Failure(record)
            }
        };

        self.cache.set(key, entry).await
    }
}
