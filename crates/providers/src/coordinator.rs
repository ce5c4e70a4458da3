//! Fallback coordinator.
//!
//! Orchestrates providers in priority order: response cache first, then
//! the availability probe gate, then the adapter call. Adapter errors
//! are already classified into the domain taxonomy; the loop branches on
//! a tagged outcome instead of catching error hierarchies. Exhausting
//! every candidate surfaces `AllProvidersUnavailable` carrying the last
//! concrete error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cv_domain::config::{CacheConfig, FallbackConfig, ProbeConfig};
use cv_domain::error::{Error, Result};
use cv_domain::message::{ChatTurn, GeneratedReply};
use cv_domain::trace::TraceEvent;
use parking_lot::RwLock;

use crate::cache::ResponseCache;
use crate::probe::AvailabilityProbe;
use crate::registry::ProviderRegistry;
use crate::traits::{ChatProvider, GenerateRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options and outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub preferred_provider: Option<String>,
    pub use_cache: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            preferred_provider: None,
            use_cache: true,
        }
    }
}

/// One adapter call, classified.
enum CallOutcome {
    Success(GeneratedReply),
    /// Connectivity / rate-limit: an ordinary fallback trigger.
    Retryable(Error),
    /// Authentication / quota: terminal for that provider.
    Terminal(Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counters owned by one coordinator instance — never shared ambient
/// state across instances.
#[derive(Default)]
pub struct CoordinatorMetrics {
    pub requests_total: AtomicU64,
    pub requests_successful: AtomicU64,
    pub requests_failed: AtomicU64,
    /// Incremented whenever the winning provider was not the first
    /// candidate tried.
    pub fallback_used: AtomicU64,
    per_provider: RwLock<HashMap<String, ProviderCounters>>,
}

#[derive(Default, Clone)]
pub struct ProviderCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub fallback_used: u64,
    pub per_provider: HashMap<String, (u64, u64, u64)>,
}

impl CoordinatorMetrics {
    fn record_attempt(&self, provider: &str) {
        self.per_provider
            .write()
            .entry(provider.to_owned())
            .or_default()
            .attempts += 1;
    }

    fn record_success(&self, provider: &str) {
        self.per_provider
            .write()
            .entry(provider.to_owned())
            .or_default()
            .successes += 1;
    }

    fn record_failure(&self, provider: &str) {
        self.per_provider
            .write()
            .entry(provider.to_owned())
            .or_default()
            .failures += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
            per_provider: self
                .per_provider
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), (v.attempts, v.successes, v.failures)))
                .collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FallbackCoordinator {
    registry: ProviderRegistry,
    cache: ResponseCache,
    probe: AvailabilityProbe,
    config: FallbackConfig,
    cache_enabled: bool,
    metrics: CoordinatorMetrics,
}

impl FallbackCoordinator {
    pub fn new(
        registry: ProviderRegistry,
        fallback: FallbackConfig,
        cache_cfg: &CacheConfig,
        probe_cfg: &ProbeConfig,
    ) -> Self {
        Self {
            registry,
            cache: ResponseCache::new(Duration::from_secs(cache_cfg.ttl_seconds)),
            probe: AvailabilityProbe::new(
                Duration::from_secs(probe_cfg.result_ttl_seconds),
                Duration::from_secs(probe_cfg.timeout_seconds),
            ),
            config: fallback,
            cache_enabled: cache_cfg.enabled,
            metrics: CoordinatorMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Generate a reply, trying candidates in order: cache → probe gate →
    /// adapter call. Fails with `AllProvidersUnavailable` when every
    /// candidate is exhausted.
    pub async fn generate(
        &self,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<GeneratedReply> {
        let req = GenerateRequest {
            history: history.to_vec(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        req.validate()?;

        let use_cache = self.cache_enabled && options.use_cache;
        let candidates = self.candidate_order(options.preferred_provider.as_deref());
        if candidates.is_empty() {
            return Err(Error::Config("no providers configured".into()));
        }

        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        let first_id = candidates[0].provider_id().to_owned();
        let mut last_err: Option<Error> = None;

        for (idx, provider) in candidates.iter().enumerate() {
            let id = provider.provider_id().to_owned();

            // 1. Cache.
            if use_cache {
                if let Some(hit) = self.cache.get(history, &id) {
                    TraceEvent::CacheHit {
                        provider: id.clone(),
                        key: ResponseCache::key_for(history, &id),
                    }
                    .emit();
                    self.metrics
                        .requests_successful
                        .fetch_add(1, Ordering::Relaxed);
                    return Ok(hit);
                }
            }

            // 2. Probe gate. A stale verdict persists for at most the
            // probe's result TTL.
            if !self.probe.is_available(provider).await {
                tracing::debug!(provider = %id, "skipping unavailable provider");
                last_err = Some(last_err.unwrap_or_else(|| Error::Connectivity {
                    provider: id.clone(),
                    message: "availability probe reported down".into(),
                }));
                continue;
            }

            // 3. Adapter call.
            if idx > 0 {
                TraceEvent::ProviderFallback {
                    from_provider: first_id.clone(),
                    to_provider: id.clone(),
                    reason: last_err
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "previous candidate unavailable".into()),
                }
                .emit();
            }

            self.metrics.record_attempt(&id);
            let start = Instant::now();
            let outcome = self.call_provider(provider, &req).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                CallOutcome::Success(reply) => {
                    TraceEvent::ProviderRequest {
                        provider: id.clone(),
                        model: reply.model.clone(),
                        duration_ms,
                        tokens_used: Some(reply.tokens_used),
                        ok: true,
                    }
                    .emit();

                    self.metrics.record_success(&id);
                    self.metrics
                        .requests_successful
                        .fetch_add(1, Ordering::Relaxed);
                    if idx > 0 {
                        self.metrics.fallback_used.fetch_add(1, Ordering::Relaxed);
                    }
                    if use_cache {
                        self.cache.put(history, &id, &reply);
                    }
                    return Ok(reply);
                }
                CallOutcome::Terminal(e) => {
                    TraceEvent::ProviderRequest {
                        provider: id.clone(),
                        model: String::new(),
                        duration_ms,
                        tokens_used: None,
                        ok: false,
                    }
                    .emit();
                    self.metrics.record_failure(&id);
                    tracing::error!(provider = %id, error = %e, "terminal provider error");

                    // Terminal for this provider; other candidates are
                    // still tried.
                    last_err = Some(e);
                }
                CallOutcome::Retryable(e) => {
                    TraceEvent::ProviderRequest {
                        provider: id.clone(),
                        model: String::new(),
                        duration_ms,
                        tokens_used: None,
                        ok: false,
                    }
                    .emit();
                    self.metrics.record_failure(&id);
                    tracing::warn!(provider = %id, error = %e, "provider failed, falling back");
                    last_err = Some(e);
                }
            }
        }

        self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
        Err(Error::AllProvidersUnavailable {
            last: Box::new(last_err.unwrap_or_else(|| Error::Other(
                "no candidate produced a concrete error".into(),
            ))),
        })
    }

    /// Aggregate health over every registered provider.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let mut health = HashMap::new();
        for provider in self.registry.all() {
            let ok = self.probe.is_available(provider).await;
            health.insert(provider.provider_id().to_owned(), ok);
        }
        health
    }

    /// Close every adapter and drop cached responses.
    pub async fn close(&self) {
        for provider in self.registry.all() {
            provider.close().await;
        }
        self.cache.clear();
        tracing::info!("coordinator closed, cache cleared");
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Preferred provider first, then the rest in registry order when
    /// cross-provider fallback is enabled; otherwise `[primary,
    /// secondary]` de-duplicated.
    fn candidate_order(&self, preferred: Option<&str>) -> Vec<Arc<dyn ChatProvider>> {
        let mut ordered: Vec<Arc<dyn ChatProvider>> = Vec::new();

        if let Some(id) = preferred {
            if let Some(p) = self.registry.get(id) {
                ordered.push(p);
            } else {
                tracing::warn!(provider = %id, "preferred provider not in registry");
            }
        }

        for provider in self.registry.all() {
            if !self.config.cross_provider && ordered.len() == 2 {
                break;
            }
            if !ordered
                .iter()
                .any(|p| p.provider_id() == provider.provider_id())
            {
                ordered.push(provider.clone());
            }
        }

        ordered
    }

    async fn call_provider(
        &self,
        provider: &Arc<dyn ChatProvider>,
        req: &GenerateRequest,
    ) -> CallOutcome {
        match provider.generate(req).await {
            Ok(reply) => CallOutcome::Success(reply),
            Err(e) if e.is_terminal() => CallOutcome::Terminal(e),
            Err(e) => CallOutcome::Retryable(e),
        }
    }
}
