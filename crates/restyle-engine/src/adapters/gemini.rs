use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use restyle_contracts::providers::ProviderId;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    api_error_text, null_as_default, request_error, response_json_or_error, AdapterRequest,
    DescribeRequest, InlineImage, ProviderAdapter, ProviderResponse, RawOutcome,
};
use crate::config::GeminiConfig;
use crate::error::TransportError;
use crate::prompt::{SOURCE_LABEL, SUBJECT_LABEL};

const DESCRIBE_MAX_OUTPUT_TOKENS: u32 = 1_000;
const DESCRIBE_TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    pub fn build_generation_payload(request: &AdapterRequest<'_>) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": request.prompt},
                    {"text": SUBJECT_LABEL},
                    {"inlineData": {"mimeType": request.target.mime_type, "data": request.target.data}},
                    {"text": SOURCE_LABEL},
                    {"inlineData": {"mimeType": request.source.mime_type, "data": request.source.data}},
                ],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            },
        })
    }

    pub fn build_describe_payload(request: &DescribeRequest<'_>) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": request.instruction},
                    {"inlineData": {"mimeType": request.image.mime_type, "data": request.image.data}},
                ],
            }],
            "generationConfig": {
                "maxOutputTokens": DESCRIBE_MAX_OUTPUT_TOKENS,
                "temperature": DESCRIBE_TEMPERATURE,
            },
        })
    }

    fn post(
        &self,
        model: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<GenerateContentResponse, TransportError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(TransportError::new(
                ProviderId::Gemini,
                None,
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = self.endpoint_for_model(model);
        debug!(%endpoint, ?timeout, "gemini request");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(timeout)
            .json(payload)
            .send()
            .map_err(|err| request_error(ProviderId::Gemini, err))?;
        let raw = response_json_or_error(ProviderId::Gemini, response)?;
        serde_json::from_value(raw).map_err(|err| {
            TransportError::new(
                ProviderId::Gemini,
                None,
                format!("unexpected generateContent shape: {err}"),
            )
        })
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn generate(&self, request: &AdapterRequest<'_>) -> Result<ProviderResponse, TransportError> {
        let payload = Self::build_generation_payload(request);
        let response = self.post(request.model, &payload, request.timeout)?;
        Ok(ProviderResponse::Gemini(response))
    }

    fn describe(&self, request: &DescribeRequest<'_>) -> Result<String, TransportError> {
        let payload = Self::build_describe_payload(request);
        let response = self.post(request.model, &payload, request.timeout)?;
        if let Some(error) = response.error.as_ref() {
            return Err(TransportError::new(ProviderId::Gemini, None, error.describe()));
        }
        Ok(response.text())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub error: Option<GeminiError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Content {
    #[serde(deserialize_with = "null_as_default")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Part {
    pub text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Blob {
    #[serde(rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeminiError {
    pub code: Option<Value>,
    pub message: Option<String>,
    pub status: Option<String>,
}

impl GeminiError {
    fn describe(&self) -> String {
        let code = self
            .status
            .clone()
            .map(Value::String)
            .or_else(|| self.code.clone());
        api_error_text(self.message.as_deref(), code.as_ref())
    }
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, joined.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    pub fn classify(&self) -> RawOutcome {
        if let Some(error) = self.error.as_ref() {
            return RawOutcome::ProviderError(error.describe());
        }
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
            .filter(|reason| !reason.trim().is_empty())
        {
            return RawOutcome::SafetyBlocked(reason.to_string());
        }
        let Some(candidate) = self.candidates.first() else {
            return RawOutcome::Empty;
        };
        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|reason| matches!(*reason, "SAFETY" | "IMAGE_SAFETY"))
        {
            return RawOutcome::SafetyBlocked(reason.to_string());
        }

        let images: Vec<InlineImage> = candidate
            .content
            .iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| !blob.data.is_empty())
            .map(|blob| InlineImage {
                mime_type: blob
                    .mime_type
                    .clone()
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| "image/png".to_string()),
                data: blob.data.clone(),
            })
            .collect();
        if images.is_empty() {
            return RawOutcome::Empty;
        }
        let description = Some(self.text()).filter(|text| !text.trim().is_empty());
        RawOutcome::Images {
            images,
            description,
        }
    }
}
