use serde::Serialize;

/// Structured trace events emitted across all Converse crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ProviderRequest {
        provider: String,
        model: String,
        duration_ms: u64,
        tokens_used: Option<u32>,
        ok: bool,
    },
    ProviderFallback {
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    CacheHit {
        provider: String,
        key: String,
    },
    ReplicaCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    ContextFlushed {
        user_id: i64,
        tier: String,
    },
    ContextRecovered {
        users: usize,
    },
    EngineTurn {
        user_id: i64,
        provider: String,
        cached: bool,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cv_event");
    }
}
