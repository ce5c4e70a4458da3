//! Shared wire helpers for the OpenAI-style chat completions contract.

use cv_domain::error::{Error, Result};
use cv_domain::message::ChatTurn;
use serde_json::Value;

/// Convert a `reqwest::Error` into the domain taxonomy for `provider`.
///
/// Timeouts and connect failures both map to `Connectivity`; the
/// coordinator treats them as fallback triggers.
pub fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "transport"
    };
    Error::Connectivity {
        provider: provider.to_owned(),
        message: format!("{kind}: {e}"),
    }
}

/// Map a non-success HTTP status to the taxonomy.
pub fn classify_status(provider: &str, status: u16, body: &str) -> Error {
    match status {
        401 => Error::Authentication {
            provider: provider.to_owned(),
            message: format!("HTTP 401 - {body}"),
        },
        402 => Error::QuotaExceeded {
            provider: provider.to_owned(),
            message: format!("HTTP 402 - {body}"),
        },
        429 => Error::RateLimited {
            provider: provider.to_owned(),
            message: format!("HTTP 429 - {body}"),
        },
        s => Error::Connectivity {
            provider: provider.to_owned(),
            message: format!("HTTP {s} - {body}"),
        },
    }
}

/// Serialize conversation history into the `messages` array.
pub fn history_to_wire(history: &[ChatTurn]) -> Vec<Value> {
    history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.text,
            })
        })
        .collect()
}

/// Extract `choices[0].message.content` or fail with a connectivity
/// error naming the provider.
pub fn extract_content(provider: &str, body: &Value) -> Result<String> {
    let content = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Connectivity {
            provider: provider.to_owned(),
            message: "malformed response: no choices[0].message.content".into(),
        })?;

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::Connectivity {
            provider: provider.to_owned(),
            message: "empty response content".into(),
        });
    }
    Ok(trimmed.to_owned())
}

/// `usage.total_tokens`, or the whitespace word count × 1.3 when the
/// provider omitted usage.
pub fn extract_tokens(body: &Value, content: &str) -> u32 {
    body.get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|v| v.as_u64())
        .map(|t| t as u32)
        .unwrap_or_else(|| (content.split_whitespace().count() as f64 * 1.3) as u32)
}

/// `finish_reason` of the first choice, when present.
pub fn extract_finish_reason(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_domain::message::Role;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert!(matches!(
            classify_status("p", 401, ""),
            Error::Authentication { .. }
        ));
        assert!(matches!(
            classify_status("p", 402, ""),
            Error::QuotaExceeded { .. }
        ));
        assert!(matches!(
            classify_status("p", 429, ""),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status("p", 503, ""),
            Error::Connectivity { .. }
        ));
    }

    #[test]
    fn content_extraction_handles_happy_and_sad_paths() {
        let ok = serde_json::json!({
            "choices": [{"message": {"content": "  hello  "}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 12},
            "model": "m",
        });
        assert_eq!(extract_content("p", &ok).unwrap(), "hello");
        assert_eq!(extract_tokens(&ok, "hello"), 12);
        assert_eq!(extract_finish_reason(&ok).as_deref(), Some("stop"));

        let empty = serde_json::json!({"choices": [{"message": {"content": ""}}]});
        assert!(extract_content("p", &empty).is_err());
        assert!(extract_content("p", &serde_json::json!({})).is_err());
    }

    #[test]
    fn token_estimate_when_usage_missing() {
        let body = serde_json::json!({"choices": []});
        // 4 words * 1.3 = 5.2 -> 5
        assert_eq!(extract_tokens(&body, "one two three four"), 5);
    }

    #[test]
    fn history_serializes_role_and_content() {
        let wire = history_to_wire(&[ChatTurn::new(Role::System, "be kind")]);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be kind");
    }
}
