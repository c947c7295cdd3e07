use restyle_contracts::generation::ErrorKind;
use restyle_contracts::providers::ProviderId;
use thiserror::Error;

/// Failures that stop a request before or outside the retry loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{label} image could not be decoded: {reason}")]
    Decode { label: &'static str, reason: String },
    #[error("{label} image has unsupported format; expected JPEG, PNG or WebP")]
    UnsupportedFormat { label: &'static str },
    #[error("{label} image is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        label: &'static str,
        size: usize,
        limit: usize,
    },
    #[error("image re-encode failed: {0}")]
    Encode(String),
    #[error("provider {0} is not configured (missing API key)")]
    ProviderUnavailable(ProviderId),
    #[error("generation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Caller-facing kind; `None` for a cancellation, which is not a failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::Decode { .. }
            | PipelineError::UnsupportedFormat { .. }
            | PipelineError::TooLarge { .. }
            | PipelineError::Encode(_) => Some(ErrorKind::Decode),
            PipelineError::ProviderUnavailable(_) => Some(ErrorKind::Provider),
            PipelineError::Cancelled => None,
        }
    }

    pub(crate) fn decode(label: &'static str, err: impl std::fmt::Display) -> Self {
        PipelineError::Decode {
            label,
            reason: err.to_string(),
        }
    }

    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        PipelineError::Encode(err.to_string())
    }
}

/// Network-level failure talking to a provider. Never retried on the same model.
#[derive(Debug, Clone, Error)]
#[error("{provider} request failed{}: {message}", status_suffix(.status))]
pub struct TransportError {
    pub provider: ProviderId,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(provider: ProviderId, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider,
            status,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_caller_taxonomy() {
        assert_eq!(
            PipelineError::decode("source", "bad header").kind(),
            Some(ErrorKind::Decode)
        );
        assert_eq!(
            PipelineError::TooLarge {
                label: "target",
                size: 11,
                limit: 10
            }
            .kind(),
            Some(ErrorKind::Decode)
        );
        let unavailable = PipelineError::ProviderUnavailable(ProviderId::Gemini).kind();
        assert_eq!(unavailable, Some(ErrorKind::Provider));
        assert!(unavailable.is_some_and(|kind| !kind.is_soft()));
        assert_eq!(PipelineError::Cancelled.kind(), None);
    }

    #[test]
    fn transport_error_display_includes_status_when_known() {
        let with_status = TransportError::new(ProviderId::OpenRouter, Some(429), "rate limited");
        assert_eq!(
            with_status.to_string(),
            "openrouter request failed (429): rate limited"
        );
        let without = TransportError::new(ProviderId::Gemini, None, "timed out");
        assert_eq!(without.to_string(), "gemini request failed: timed out");
    }
}
