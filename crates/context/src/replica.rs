//! Replicated cache tier.
//!
//! [`ReplicaStore`] abstracts a TTL'd key-value service with prefix
//! scans. The production implementation talks REST to the replica
//! service with automatic retry + exponential back-off on transient
//! (5xx / timeout) failures; 4xx client errors are permanent and never
//! retried.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cv_domain::config::ReplicaConfig;
use cv_domain::error::{Error, Result};
use cv_domain::trace::TraceEvent;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contract of the replicated cache tier.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with a TTL.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All live keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
struct PutBody<'a> {
    value: &'a str,
    ttl_seconds: u64,
}

#[derive(Deserialize)]
struct GetBody {
    value: String,
}

#[derive(Deserialize)]
struct ScanBody {
    keys: Vec<String>,
}

/// REST-based client for the replica KV service. Created once and
/// reused; the underlying `reqwest::Client` maintains a connection
/// pool.
#[derive(Debug, Clone)]
pub struct RestReplicaClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestReplicaClient {
    pub fn new(cfg: &ReplicaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decorate a request with the standard headers.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let trace_id = Uuid::new_v4().to_string();
        let mut rb = rb.header("X-Trace-Id", &trace_id);
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    /// Execute with retry + exponential back-off on transient errors.
    /// Emits a `ReplicaCall` trace event after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    TraceEvent::ReplicaCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    if resp.status().is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Storage(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_client_error()
                        && resp.status() != StatusCode::NOT_FOUND
                    {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::Storage(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::ReplicaCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();

                    last_err = Some(if e.is_timeout() {
                        Error::Timeout(e.to_string())
                    } else {
                        Error::Http(e.to_string())
                    });
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Storage(format!("{endpoint}: all retries exhausted"))))
    }
}

#[async_trait]
impl ReplicaStore for RestReplicaClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let url = self.url(&format!("/api/kv/{key}"));
        let resp = self
            .execute_with_retry("GET /api/kv", || self.http.get(&url))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let parsed: GetBody = serde_json::from_str(&body)
            .map_err(|e| Error::Storage(format!("malformed kv response: {e}")))?;
        Ok(Some(parsed.value))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let url = self.url(&format!("/api/kv/{key}"));
        let body = PutBody {
            value,
            ttl_seconds: ttl.as_secs(),
        };
        self.execute_with_retry("PUT /api/kv", || self.http.put(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.url(&format!("/api/kv/{key}"));
        self.execute_with_retry("DELETE /api/kv", || self.http.delete(&url))
            .await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let url = self.url("/api/kv");
        let prefix = prefix.to_owned();
        let resp = self
            .execute_with_retry("GET /api/kv?prefix", || {
                self.http.get(&url).query(&[("prefix", prefix.as_str())])
            })
            .await?;

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let parsed: ScanBody = serde_json::from_str(&body)
            .map_err(|e| Error::Storage(format!("malformed scan response: {e}")))?;
        Ok(parsed.keys)
    }
}
