//! Provider registry — builds adapters from config and preserves the
//! configured priority order.

use std::sync::Arc;

use cv_domain::config::{ProviderConfig, ProviderKind};
use cv_domain::error::Result;

use crate::openai::OpenAiCompatProvider;
use crate::openrouter::OpenRouterProvider;
use crate::traits::ChatProvider;

pub struct ProviderRegistry {
    /// Adapters in config order; the first entry is the primary.
    providers: Vec<Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    /// Instantiate every configured adapter. Unconfigured providers are
    /// kept in the registry (the coordinator skips them via the probe)
    /// but logged, so a missing key is visible at startup.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self> {
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::with_capacity(configs.len());

        for cfg in configs {
            let provider: Arc<dyn ChatProvider> = match cfg.kind {
                ProviderKind::Openrouter => Arc::new(OpenRouterProvider::from_config(cfg)?),
                ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::from_config(cfg)?),
            };

            if !provider.is_configured() {
                tracing::warn!(provider = %cfg.id, "provider registered but not configured");
            } else {
                tracing::info!(provider = %cfg.id, models = cfg.models.len(), "provider registered");
            }
            providers.push(provider);
        }

        Ok(Self { providers })
    }

    /// Build directly from adapter instances (tests).
    pub fn from_providers(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers
            .iter()
            .find(|p| p.provider_id() == provider_id)
            .cloned()
    }

    /// Provider ids in priority order.
    pub fn ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider_id().to_owned())
            .collect()
    }

    pub fn all(&self) -> &[Arc<dyn ChatProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
