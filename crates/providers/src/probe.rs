//! Cached availability probing.
//!
//! `is_available` wraps the adapter's health contract in its own short
//! timeout and caches the verdict per provider, so a burst of requests
//! does not hammer a provider with liveness checks. Any probe failure
//! (error or timeout) counts as unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::traits::ChatProvider;

#[derive(Clone, Copy)]
struct ProbeResult {
    available: bool,
    probed_at: Instant,
}

pub struct AvailabilityProbe {
    results: RwLock<HashMap<String, ProbeResult>>,
    result_ttl: Duration,
    probe_timeout: Duration,
}

impl AvailabilityProbe {
    pub fn new(result_ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            result_ttl,
            probe_timeout,
        }
    }

    /// Whether `provider` is believed reachable. May perform one health
    /// call when the cached verdict is stale; the staleness window is at
    /// most `result_ttl`.
    pub async fn is_available(&self, provider: &Arc<dyn ChatProvider>) -> bool {
        let id = provider.provider_id().to_owned();

        if let Some(result) = self.results.read().get(&id) {
            if result.probed_at.elapsed() < self.result_ttl {
                return result.available;
            }
        }

        if !provider.is_configured() {
            self.record(&id, false);
            return false;
        }

        let available =
            match tokio::time::timeout(self.probe_timeout, provider.health_check()).await {
                Ok(Ok(health)) => health.healthy,
                Ok(Err(e)) => {
                    tracing::warn!(provider = %id, error = %e, "health probe failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(provider = %id, timeout = ?self.probe_timeout, "health probe timed out");
                    false
                }
            };

        self.record(&id, available);
        available
    }

    /// Drop a cached verdict, forcing the next check to re-probe.
    pub fn invalidate(&self, provider_id: &str) {
        self.results.write().remove(provider_id);
    }

    fn record(&self, provider_id: &str, available: bool) {
        self.results.write().insert(
            provider_id.to_owned(),
            ProbeResult {
                available,
                probed_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_domain::error::Result;
    use cv_domain::message::GeneratedReply;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::traits::{GenerateRequest, ProviderHealth};

    /// Counts health calls; healthy or not per construction.
    struct CountingProvider {
        healthy: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChatProvider for CountingProvider {
        async fn generate(&self, _req: &GenerateRequest) -> Result<GeneratedReply> {
            unreachable!("probe never generates")
        }

        async fn health_check(&self) -> Result<ProviderHealth> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderHealth {
                healthy: self.healthy,
                model: "test".into(),
                detail: None,
            })
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn provider_id(&self) -> &str {
            "counting"
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn verdict_is_cached_within_ttl() {
        let provider: Arc<dyn ChatProvider> = Arc::new(CountingProvider {
            healthy: true,
            calls: AtomicUsize::new(0),
        });
        let probe = AvailabilityProbe::new(Duration::from_secs(60), Duration::from_secs(10));

        assert!(probe.is_available(&provider).await);
        assert!(probe.is_available(&provider).await);
        assert!(probe.is_available(&provider).await);

        // Only the first check performed a real health call.
        let counting = Arc::new(CountingProvider {
            healthy: true,
            calls: AtomicUsize::new(0),
        });
        let as_trait: Arc<dyn ChatProvider> = counting.clone();
        probe.invalidate("counting");
        probe.is_available(&as_trait).await;
        probe.is_available(&as_trait).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhealthy_provider_reports_unavailable() {
        let provider: Arc<dyn ChatProvider> = Arc::new(CountingProvider {
            healthy: false,
            calls: AtomicUsize::new(0),
        });
        let probe = AvailabilityProbe::new(Duration::from_secs(60), Duration::from_secs(10));
        assert!(!probe.is_available(&provider).await);
    }
}
