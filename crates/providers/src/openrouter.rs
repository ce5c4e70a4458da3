//! OpenRouter adapter.
//!
//! Speaks the OpenAI-style chat completions contract with OpenRouter's
//! extra attribution headers, and walks an ordered model list within the
//! provider: a retryable rejection of the current model advances to the
//! next configured model before failure surfaces to the coordinator.

use std::time::{Duration, Instant};

use cv_domain::config::ProviderConfig;
use cv_domain::error::{Error, Result};
use cv_domain::message::GeneratedReply;
use serde_json::Value;

use crate::traits::{ChatProvider, GenerateRequest, ProviderHealth};
use crate::util::{
    classify_status, extract_content, extract_finish_reason, extract_tokens, from_reqwest,
    history_to_wire,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenRouterProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    max_retries: u32,
    site_url: Option<String>,
    app_name: Option<String>,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    /// Build the adapter from its deserialized config. The underlying
    /// `reqwest::Client` is created once and reused for every call.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.read_timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            models: cfg.models.clone(),
            max_retries: cfg.max_retries,
            site_url: cfg.site_url.clone(),
            app_name: cfg.app_name.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut rb = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(ref key) = self.api_key {
            rb = rb.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(ref site) = self.site_url {
            rb = rb.header("HTTP-Referer", site);
        }
        if let Some(ref app) = self.app_name {
            rb = rb.header("X-Title", app);
        }
        rb
    }

    /// One model's request with the in-adapter retry ladder: 429 backs
    /// off exponentially, 5xx and transport failures back off linearly,
    /// terminal statuses surface immediately.
    async fn request_model(
        &self,
        model: &str,
        req: &GenerateRequest,
    ) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": history_to_wire(&req.history),
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": false,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..self.max_retries {
            tracing::debug!(provider = %self.id, model = %model, attempt, "openrouter request");

            let resp = match self.authed_post(&url).json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_err = Some(from_reqwest(&self.id, e));
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
                    continue;
                }
            };

            let status = resp.status().as_u16();
            if status == 200 {
                let text = resp
                    .text()
                    .await
                    .map_err(|e| from_reqwest(&self.id, e))?;
                return serde_json::from_str(&text).map_err(|e| Error::Connectivity {
                    provider: self.id.clone(),
                    message: format!("malformed response body: {e}"),
                });
            }

            let text = resp.text().await.unwrap_or_default();
            let err = classify_status(&self.id, status, &text);
            if err.is_terminal() {
                return Err(err);
            }

            match &err {
                Error::RateLimited { .. } if attempt + 1 < self.max_retries => {
                    let delay = Duration::from_secs(1u64 << attempt);
                    tracing::warn!(provider = %self.id, model = %model, ?delay, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Error::Connectivity { .. } if attempt + 1 < self.max_retries => {
                    let delay = Duration::from_secs(u64::from(attempt) + 1);
                    tracing::warn!(provider = %self.id, model = %model, status, ?delay, "server error, retrying");
                    tokio::time::sleep(delay).await;
                }
                _ => {}
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| Error::Connectivity {
            provider: self.id.clone(),
            message: "all attempts exhausted".into(),
        }))
    }

    fn reply_from(&self, model: &str, body: &Value, latency: f64) -> Result<GeneratedReply> {
        let content = extract_content(&self.id, body)?;
        let tokens_used = extract_tokens(body, &content);
        let metadata = serde_json::json!({
            "model_used": body.get("model").and_then(|m| m.as_str()).unwrap_or(model),
            "finish_reason": extract_finish_reason(body),
            "usage": body.get("usage").cloned().unwrap_or(Value::Null),
        });

        Ok(GeneratedReply {
            text: content,
            model: model.to_owned(),
            tokens_used,
            latency_seconds: latency,
            provider: self.id.clone(),
            cached: false,
            metadata: Some(metadata),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedReply> {
        req.validate()?;

        if !self.is_configured() {
            return Err(Error::Authentication {
                provider: self.id.clone(),
                message: "not configured: missing API key or model list".into(),
            });
        }

        // Model selection is request-local: the walk index lives on this
        // stack frame, never on the adapter instance.
        let mut failed_models: Vec<String> = Vec::new();
        let mut last_err: Option<Error> = None;

        for model in &self.models {
            let start = Instant::now();
            match self.request_model(model, req).await {
                Ok(body) => {
                    let latency = start.elapsed().as_secs_f64();
                    return self.reply_from(model, &body, latency);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    tracing::warn!(provider = %self.id, model = %model, error = %e, "model failed, advancing model list");
                    failed_models.push(model.clone());
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Connectivity {
            provider: self.id.clone(),
            message: format!(
                "all models failed [{}]; last error: {}",
                failed_models.join(", "),
                last_err.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        let model = self
            .models
            .first()
            .cloned()
            .unwrap_or_default();

        if !self.is_configured() {
            return Ok(ProviderHealth {
                healthy: false,
                model,
                detail: Some("not configured".into()),
            });
        }

        let probe = GenerateRequest {
            history: vec![cv_domain::message::ChatTurn::new(
                cv_domain::message::Role::User,
                "Hello",
            )],
            temperature: 0.0,
            max_tokens: 8,
        };

        match self.request_model(&model, &probe).await {
            Ok(_) => Ok(ProviderHealth {
                healthy: true,
                model,
                detail: None,
            }),
            Err(e) => Ok(ProviderHealth {
                healthy: false,
                model,
                detail: Some(e.to_string()),
            }),
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty()) && !self.models.is_empty()
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn close(&self) {
        // reqwest::Client drops its pool when the last clone goes away;
        // nothing else to release.
        tracing::debug!(provider = %self.id, "provider closed");
    }
}
