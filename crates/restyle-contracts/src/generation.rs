use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Caller-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[serde(rename = "DECODE_ERROR")]
    Decode,
    #[serde(rename = "TRANSPORT_ERROR")]
    Transport,
    SafetyBlocked,
    NoImageGenerated,
    #[serde(rename = "PROVIDER_ERROR")]
    Provider,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Decode => "DECODE_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::SafetyBlocked => "SAFETY_BLOCKED",
            ErrorKind::NoImageGenerated => "NO_IMAGE_GENERATED",
            ErrorKind::Provider => "PROVIDER_ERROR",
        }
    }

    /// Soft failures may be retried by the user and must not consume credit.
    /// `Provider` is reported only for configuration problems a retry cannot fix.
    pub fn is_soft(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::NoImageGenerated)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one provider call inside the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Success,
    EmptyResponse,
    EchoedInput,
    SafetyBlocked,
    ProviderError,
    TransportError,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::EmptyResponse => "empty-response",
            AttemptOutcome::EchoedInput => "echoed-input",
            AttemptOutcome::SafetyBlocked => "safety-blocked",
            AttemptOutcome::ProviderError => "provider-error",
            AttemptOutcome::TransportError => "transport-error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How EXIF orientation tags are honoured when loading an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationMode {
    /// Apply the tag unless the pixel aspect ratio suggests the image is
    /// already upright (common for phone photos). Approximate.
    #[default]
    Heuristic,
    /// Always apply the tag.
    Strict,
    /// Ignore the tag.
    Disabled,
}

impl OrientationMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "auto" => Some(OrientationMode::Heuristic),
            "strict" | "always" => Some(OrientationMode::Strict),
            "disabled" | "off" | "none" => Some(OrientationMode::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub preserve_quality: bool,
    pub high_quality: bool,
    pub maintain_aspect_ratio: bool,
    pub preserve_target_dimensions: bool,
    pub orientation: OrientationMode,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            preserve_quality: true,
            high_quality: true,
            maintain_aspect_ratio: true,
            preserve_target_dimensions: true,
            orientation: OrientationMode::Heuristic,
        }
    }
}

/// Per-model retry budget and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Same-model retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub const MAX_RETRIES_CEILING: u32 = 4;

    pub fn new(max_retries: u32, base_delay: Duration, request_timeout: Duration) -> Self {
        Self {
            max_retries: max_retries.min(Self::MAX_RETRIES_CEILING),
            base_delay,
            request_timeout,
        }
    }

    pub fn max_attempts_per_model(&self) -> u32 {
        self.max_retries + 1
    }

    /// Linear backoff before the retry with the given zero-based attempt index.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1), Duration::from_secs(120))
    }
}
