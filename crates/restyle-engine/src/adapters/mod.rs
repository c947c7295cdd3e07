//! One adapter per remote API. Adapters build the provider-specific request,
//! perform a single HTTP call, and hand back the typed response; retry and
//! fallback decisions live in the orchestrator.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Response as HttpResponse;
use restyle_contracts::providers::{NamedProvider, ProviderId};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::TransportError;
use crate::preprocess::ImageAsset;

pub mod gemini;
pub mod openrouter;

pub use gemini::{GeminiAdapter, GenerateContentResponse};
pub use openrouter::{ChatCompletion, OpenRouterAdapter};

/// Base64 payload plus MIME type, ready to inline into a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn from_asset(asset: &ImageAsset) -> Self {
        Self {
            mime_type: asset.format().as_str().to_string(),
            data: asset.to_base64(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One image-generation call against one model.
#[derive(Debug, Clone, Copy)]
pub struct AdapterRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub source: &'a EncodedImage,
    pub target: &'a EncodedImage,
    pub timeout: Duration,
}

/// Single-image vision call returning text.
#[derive(Debug, Clone, Copy)]
pub struct DescribeRequest<'a> {
    pub model: &'a str,
    pub instruction: &'a str,
    pub image: &'a EncodedImage,
    pub timeout: Duration,
}

pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;
    fn is_configured(&self) -> bool;
    fn generate(&self, request: &AdapterRequest<'_>) -> Result<ProviderResponse, TransportError>;
    fn describe(&self, request: &DescribeRequest<'_>) -> Result<String, TransportError>;
}

impl NamedProvider for Box<dyn ProviderAdapter> {
    fn provider_id(&self) -> ProviderId {
        self.id()
    }
}

/// Parsed response body, one variant per wire schema.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    OpenRouter(ChatCompletion),
    Gemini(GenerateContentResponse),
}

impl ProviderResponse {
    pub fn classify(&self) -> RawOutcome {
        match self {
            ProviderResponse::OpenRouter(completion) => completion.classify(),
            ProviderResponse::Gemini(response) => response.classify(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 without the `data:` prefix.
    pub data: String,
}

impl InlineImage {
    pub fn from_data_url(url: &str) -> Option<Self> {
        let (meta, payload) = url.trim().split_once(',')?;
        let meta = meta.strip_prefix("data:")?;
        if !meta.contains(";base64") {
            return None;
        }
        let mime_type = meta
            .split(';')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("image/png");
        let data = payload.trim();
        if data.is_empty() {
            return None;
        }
        Some(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .context("generated image base64 decode failed")
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Provider-neutral reading of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    Images {
        images: Vec<InlineImage>,
        description: Option<String>,
    },
    Empty,
    SafetyBlocked(String),
    ProviderError(String),
}

/// Reads an explicit JSON `null` as the field's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn response_json_or_error(
    provider: ProviderId,
    response: HttpResponse,
) -> Result<Value, TransportError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| {
            TransportError::new(
                provider,
                Some(code),
                format!("body read failed: {}", err.without_url()),
            )
        })?;
    if !status.is_success() {
        return Err(TransportError::new(
            provider,
            Some(code),
            error_message_from_body(&body),
        ));
    }
    serde_json::from_str(&body).map_err(|err| {
        TransportError::new(
            provider,
            Some(code),
            format!("invalid JSON payload: {err}"),
        )
    })
}

/// `error.message` from a JSON error body, else the truncated raw body.
pub(crate) fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("error")
                .and_then(|error| error.get("message").or(Some(error)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}

/// Converts a send failure; the URL is stripped since it may carry a key.
pub(crate) fn request_error(provider: ProviderId, err: reqwest::Error) -> TransportError {
    let err = err.without_url();
    let status = err.status().map(|status| status.as_u16());
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    TransportError::new(provider, status, message)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn api_error_text(message: Option<&str>, code: Option<&Value>) -> String {
    let message = message.map(str::trim).filter(|value| !value.is_empty());
    let code = code.and_then(|value| match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    });
    match (code, message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (None, Some(message)) => message.to_string(),
        (Some(code), None) => code,
        (None, None) => "provider reported an error without details".to_string(),
    }
}
