use cv_domain::error::{Error, Result};
use cv_domain::message::{ChatTurn, GeneratedReply};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Ordered conversation history, oldest first.
    pub history: Vec<ChatTurn>,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f32,
    /// Maximum tokens in the response (1 – 8000).
    pub max_tokens: u32,
}

impl GenerateRequest {
    /// Reject out-of-range parameters before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.history.is_empty() {
            return Err(Error::InvalidInput("message history is empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidInput(format!(
                "temperature {} out of range 0.0-2.0",
                self.temperature
            )));
        }
        if !(1..=8000).contains(&self.max_tokens) {
            return Err(Error::InvalidInput(format!(
                "max_tokens {} out of range 1-8000",
                self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Result of a lightweight health call.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub model: String,
    pub detail: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every chat backend adapter must implement.
///
/// Concrete adapters differ only in wire encoding, in-provider model
/// fallback, and error-code mapping. Raw transport/status errors are
/// classified into the domain taxonomy at this boundary; the coordinator
/// only ever sees taxonomy errors.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send the history and wait for a full reply.
    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedReply>;

    /// Lightweight liveness contract used by the availability probe.
    async fn health_check(&self) -> Result<ProviderHealth>;

    /// Whether the adapter has the credentials and endpoint it needs.
    fn is_configured(&self) -> bool;

    /// Registry id of this provider instance.
    fn provider_id(&self) -> &str;

    /// Release the outbound connection resource.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_domain::message::Role;

    fn req(temperature: f32, max_tokens: u32) -> GenerateRequest {
        GenerateRequest {
            history: vec![ChatTurn::new(Role::User, "hi")],
            temperature,
            max_tokens,
        }
    }

    #[test]
    fn validate_accepts_in_range() {
        assert!(req(0.7, 1000).validate().is_ok());
        assert!(req(0.0, 1).validate().is_ok());
        assert!(req(2.0, 8000).validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(req(2.1, 1000).validate().is_err());
        assert!(req(-0.1, 1000).validate().is_err());
        assert!(req(0.7, 0).validate().is_err());
        assert!(req(0.7, 8001).validate().is_err());

        let empty = GenerateRequest {
            history: vec![],
            temperature: 0.7,
            max_tokens: 100,
        };
        assert!(matches!(
            empty.validate(),
            Err(Error::InvalidInput(_))
        ));
    }
}
