/// Shared error type used across all Converse crates.
///
/// Provider-facing variants follow a fixed taxonomy: authentication and
/// quota errors are terminal for a provider, rate-limit and connectivity
/// errors are fallback triggers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider} authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("provider {provider} quota exceeded: {message}")]
    QuotaExceeded { provider: String, message: String },

    #[error("provider {provider} rate limited: {message}")]
    RateLimited { provider: String, message: String },

    #[error("provider {provider} unreachable: {message}")]
    Connectivity { provider: String, message: String },

    #[error("all providers unavailable; last error: {last}")]
    AllProvidersUnavailable { last: Box<Error> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The provider a taxonomy error originated from, when it has one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::Authentication { provider, .. }
            | Error::QuotaExceeded { provider, .. }
            | Error::RateLimited { provider, .. }
            | Error::Connectivity { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Terminal errors are never retried on the same provider and skip
    /// the remaining models of a model-list walk.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::QuotaExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
