//! The conversation engine: one entry point per user message.
//!
//! `handle_message` loads the user's context, asks the provider
//! coordinator for a reply, records the exchange through the tiered
//! store, and returns the reply. Persistence problems degrade to a
//! context-free conversation; provider exhaustion degrades to a fixed
//! apology. Neither surfaces as an error to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cv_context::{recover_contexts, ContextStore, FlushScheduler, PendingExchange, RestReplicaClient, SqliteStore};
use cv_domain::config::Config;
use cv_domain::context::ContextWindow;
use cv_domain::error::{Error, Result};
use cv_domain::message::{ChatTurn, Role};
use cv_domain::trace::TraceEvent;
use cv_providers::{FallbackCoordinator, GenerateOptions, MetricsSnapshot, ProviderRegistry};

/// What the engine hands back for one message. `provider` and `model`
/// are absent when the reply is the apology fallback.
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub text: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tokens_used: u32,
    pub latency_seconds: f64,
    pub cached: bool,
}

pub struct ChatEngine {
    coordinator: FallbackCoordinator,
    store: Arc<ContextStore>,
    scheduler: Option<FlushScheduler>,
    default_limit: u32,
    default_max_age_hours: u32,
    options: GenerateOptions,
    apology: String,
}

impl ChatEngine {
    /// Wire the full stack from configuration: providers, coordinator,
    /// replica client, SQLite, crash recovery, flush scheduler.
    pub async fn open(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config.providers)?;
        let coordinator = FallbackCoordinator::new(
            registry,
            config.fallback.clone(),
            &config.cache,
            &config.probe,
        );

        let replica = Arc::new(RestReplicaClient::new(&config.replica)?);
        let durable = Arc::new(SqliteStore::open(&config.durable.path)?);
        let store = Arc::new(ContextStore::new(
            replica.clone(),
            durable,
            config.persistence.clone(),
        ));

        match recover_contexts(store.buffer(), replica.as_ref()).await {
            Ok(users) if users > 0 => tracing::info!(users, "recovered buffered contexts"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "context recovery failed, starting cold"),
        }

        let scheduler = FlushScheduler::spawn(
            store.clone(),
            Duration::from_secs(config.persistence.scheduler_period_seconds),
        );

        Ok(Self {
            coordinator,
            store,
            scheduler: Some(scheduler),
            default_limit: config.persistence.default_limit,
            default_max_age_hours: config.persistence.default_max_age_hours,
            options: GenerateOptions {
                temperature: config.fallback.default_temperature,
                max_tokens: config.fallback.default_max_tokens,
                ..GenerateOptions::default()
            },
            apology: config.engine.apology_text.clone(),
        })
    }

    /// Assemble an engine from pre-built parts. No scheduler is
    /// spawned; tests drive [`ContextStore::flush_cycle`] directly.
    pub fn with_parts(
        coordinator: FallbackCoordinator,
        store: Arc<ContextStore>,
        config: &Config,
    ) -> Self {
        Self {
            coordinator,
            store,
            scheduler: None,
            default_limit: config.persistence.default_limit,
            default_max_age_hours: config.persistence.default_max_age_hours,
            options: GenerateOptions {
                temperature: config.fallback.default_temperature,
                max_tokens: config.fallback.default_max_tokens,
                ..GenerateOptions::default()
            },
            apology: config.engine.apology_text.clone(),
        }
    }

    /// One conversational turn for `user_id`.
    pub async fn handle_message(&self, user_id: i64, text: &str) -> Result<EngineReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("empty message".into()));
        }
        let start = Instant::now();

        let mut context = match self
            .store
            .load_context(user_id, self.default_limit, self.default_max_age_hours)
            .await
        {
            Ok(ctx) => ctx.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "context load failed, replying without history");
                ContextWindow::default()
            }
        };

        let user_turn = ChatTurn::now(Role::User, text);
        let mut history = context.combined_history();
        history.push(user_turn.clone());

        match self.coordinator.generate(&history, &self.options).await {
            Ok(reply) => {
                context.push_user_turn(user_turn);
                context.push_assistant_turn(ChatTurn::now(Role::Assistant, reply.text.clone()));

                let exchange = PendingExchange {
                    user_message: text.to_owned(),
                    assistant_message: reply.text.clone(),
                    model: reply.model.clone(),
                    tokens_used: reply.tokens_used,
                    latency_seconds: reply.latency_seconds,
                };
                if let Err(e) = self
                    .store
                    .save_context(user_id, context, Some(exchange), false)
                    .await
                {
                    tracing::warn!(user_id, error = %e, "context save failed, exchange not buffered");
                }

                TraceEvent::EngineTurn {
                    user_id,
                    provider: reply.provider.clone(),
                    cached: reply.cached,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
                .emit();

                Ok(EngineReply {
                    text: reply.text,
                    provider: Some(reply.provider),
                    model: Some(reply.model),
                    tokens_used: reply.tokens_used,
                    latency_seconds: reply.latency_seconds,
                    cached: reply.cached,
                })
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "all providers exhausted, sending apology");
                Ok(EngineReply {
                    text: self.apology.clone(),
                    provider: None,
                    model: None,
                    tokens_used: 0,
                    latency_seconds: start.elapsed().as_secs_f64(),
                    cached: false,
                })
            }
        }
    }

    /// Probe verdict per configured provider.
    pub async fn health(&self) -> HashMap<String, bool> {
        self.coordinator.health_check().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics().snapshot()
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Orderly shutdown: stop the scheduler, drain the buffer into
    /// SQLite, close the providers.
    pub async fn close(mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        self.store.close().await?;
        self.coordinator.close().await;
        Ok(())
    }
}
