use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Registered providers, in fallback priority order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub replica: ReplicaConfig,
    #[serde(default)]
    pub durable: DurableConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load config from a TOML file, then apply `CV_<ID>_API_KEY`
    /// environment overrides for provider credentials.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Pull API keys from `CV_<ID>_API_KEY` (id upper-cased) so secrets
    /// stay out of the config file.
    pub fn apply_env_overrides(&mut self) {
        for provider in &mut self.providers {
            let var = format!("CV_{}_API_KEY", provider.id.to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                if !key.is_empty() {
                    provider.api_key = Some(key);
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openrouter,
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry id, unique across the provider list.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Ordered model list; the first entry is the default, the rest are
    /// in-provider fallbacks (OpenRouter only walks past the first).
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
    /// Extra attribution headers (OpenRouter's HTTP-Referer / X-Title).
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// When false, only the preferred (or primary) provider is tried.
    #[serde(default = "d_true")]
    pub cross_provider: bool,
    #[serde(default = "d_temperature")]
    pub default_temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub default_max_tokens: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            cross_provider: true,
            default_temperature: 0.7,
            default_max_tokens: 1000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response cache + availability probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_60")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// How long one probe result stays valid.
    #[serde(default = "d_60")]
    pub result_ttl_seconds: u64,
    /// Timeout on the health call itself, independent of the adapter's
    /// request timeout.
    #[serde(default = "d_10")]
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            result_ttl_seconds: 60,
            timeout_seconds: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replicated cache tier (REST KV service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    #[serde(default = "d_replica_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            base_url: d_replica_url(),
            api_key: None,
            timeout_ms: 8000,
            max_retries: 3,
        }
    }
}

/// Durable tier (SQLite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableConfig {
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Dirty entries older than this are replicated on the next save.
    #[serde(default = "d_60")]
    pub replicate_after_seconds: u64,
    /// Buffered entries older than this flush to the durable tier.
    #[serde(default = "d_600")]
    pub flush_interval_seconds: u64,
    /// Background scheduler period.
    #[serde(default = "d_30")]
    pub scheduler_period_seconds: u64,
    /// TTL of the fast-lookup context record in the replica tier.
    #[serde(default = "d_1800")]
    pub context_ttl_seconds: u64,
    /// Standard window size used for replica-tier lookups.
    #[serde(default = "d_6")]
    pub default_limit: u32,
    /// Standard max-age used for replica-tier lookups.
    #[serde(default = "d_12")]
    pub default_max_age_hours: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            replicate_after_seconds: 60,
            flush_interval_seconds: 600,
            scheduler_period_seconds: 30,
            context_ttl_seconds: 1800,
            default_limit: 6,
            default_max_age_hours: 12,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// What the caller shows when every provider is exhausted.
    #[serde(default = "d_apology")]
    pub apology_text: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            apology_text: d_apology(),
        }
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_3() -> u32 {
    3
}
fn d_6() -> u32 {
    6
}
fn d_10() -> u64 {
    10
}
fn d_12() -> u32 {
    12
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_600() -> u64 {
    600
}
fn d_1800() -> u64 {
    1800
}
fn d_8000() -> u64 {
    8000
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    1000
}
fn d_connect_timeout_ms() -> u64 {
    5000
}
fn d_read_timeout_ms() -> u64 {
    60_000
}
fn d_replica_url() -> String {
    "http://127.0.0.1:7700".into()
}
fn d_db_path() -> PathBuf {
    PathBuf::from("./data/conversations.db")
}
fn d_apology() -> String {
    "Sorry, I'm having trouble answering right now. Please try again in a moment.".into()
}
