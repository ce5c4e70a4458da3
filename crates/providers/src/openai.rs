//! Plain OpenAI-compatible adapter.
//!
//! Works with OpenAI and any endpoint following the same chat
//! completions contract. Single configured model, bearer auth, same
//! status-code mapping as the OpenRouter adapter but no model-list walk.

use std::time::{Duration, Instant};

use cv_domain::config::ProviderConfig;
use cv_domain::error::{Error, Result};
use cv_domain::message::{ChatTurn, GeneratedReply, Role};
use serde_json::Value;

use crate::traits::{ChatProvider, GenerateRequest, ProviderHealth};
use crate::util::{
    classify_status, extract_content, extract_finish_reason, extract_tokens, from_reqwest,
    history_to_wire,
};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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
            model: cfg.models.first().cloned().unwrap_or_default(),
            max_retries: cfg.max_retries,
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
        rb
    }

    async fn request(&self, req: &GenerateRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": history_to_wire(&req.history),
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": false,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..self.max_retries {
            tracing::debug!(provider = %self.id, model = %self.model, attempt, "openai request");

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

            if attempt + 1 < self.max_retries {
                let delay = match err {
                    Error::RateLimited { .. } => Duration::from_secs(1u64 << attempt),
                    _ => Duration::from_secs(u64::from(attempt) + 1),
                };
                tracing::warn!(provider = %self.id, status, ?delay, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| Error::Connectivity {
            provider: self.id.clone(),
            message: "all attempts exhausted".into(),
        }))
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedReply> {
        req.validate()?;

        if !self.is_configured() {
            return Err(Error::Authentication {
                provider: self.id.clone(),
                message: "not configured: missing API key or model".into(),
            });
        }

        let start = Instant::now();
        let body = self.request(req).await?;
        let latency = start.elapsed().as_secs_f64();

        let content = extract_content(&self.id, &body)?;
        let tokens_used = extract_tokens(&body, &content);
        let metadata = serde_json::json!({
            "model_used": body.get("model").and_then(|m| m.as_str()).unwrap_or(&self.model),
            "finish_reason": extract_finish_reason(&body),
        });

        Ok(GeneratedReply {
            text: content,
            model: self.model.clone(),
            tokens_used,
            latency_seconds: latency,
            provider: self.id.clone(),
            cached: false,
            metadata: Some(metadata),
        })
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        if !self.is_configured() {
            return Ok(ProviderHealth {
                healthy: false,
                model: self.model.clone(),
                detail: Some("not configured".into()),
            });
        }

        let probe = GenerateRequest {
            history: vec![ChatTurn::new(Role::User, "Hello")],
            temperature: 0.0,
            max_tokens: 8,
        };

        match self.request(&probe).await {
            Ok(_) => Ok(ProviderHealth {
                healthy: true,
                model: self.model.clone(),
                detail: None,
            }),
            Err(e) => Ok(ProviderHealth {
                healthy: false,
                model: self.model.clone(),
                detail: Some(e.to_string()),
            }),
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty()) && !self.model.is_empty()
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn close(&self) {
        tracing::debug!(provider = %self.id, "provider closed");
    }
}
