use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use restyle_contracts::providers::ProviderId;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    api_error_text, null_as_default, request_error, response_json_or_error, AdapterRequest,
    DescribeRequest, InlineImage, ProviderAdapter, ProviderResponse, RawOutcome,
};
use crate::config::OpenRouterConfig;
use crate::error::TransportError;
use crate::prompt::{SOURCE_LABEL, SUBJECT_LABEL};

const GENERATION_MAX_TOKENS: u32 = 20_000;
const GENERATION_TEMPERATURE: f64 = 0.4;
const DESCRIBE_MAX_TOKENS: u32 = 1_000;
const DESCRIBE_TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    config: OpenRouterConfig,
    http: HttpClient,
}

impl OpenRouterAdapter {
    pub fn new(config: OpenRouterConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    pub fn build_generation_payload(request: &AdapterRequest<'_>) -> Value {
        json!({
            "model": request.model,
            "modalities": ["text", "image"],
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": request.prompt},
                    {"type": "text", "text": SUBJECT_LABEL},
                    {"type": "image_url", "image_url": {"url": request.target.data_url()}},
                    {"type": "text", "text": SOURCE_LABEL},
                    {"type": "image_url", "image_url": {"url": request.source.data_url()}},
                ],
            }],
            "max_tokens": GENERATION_MAX_TOKENS,
            "temperature": GENERATION_TEMPERATURE,
            "stream": false,
        })
    }

    pub fn build_describe_payload(request: &DescribeRequest<'_>) -> Value {
        json!({
            "model": request.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": request.instruction},
                    {"type": "image_url", "image_url": {"url": request.image.data_url()}},
                ],
            }],
            "max_tokens": DESCRIBE_MAX_TOKENS,
            "temperature": DESCRIBE_TEMPERATURE,
        })
    }

    fn post(&self, payload: &Value, timeout: Duration) -> Result<Value, TransportError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(TransportError::new(
                ProviderId::OpenRouter,
                None,
                "OPENROUTER_API_KEY not set",
            ));
        };
        let endpoint = self.endpoint();
        debug!(%endpoint, ?timeout, "openrouter request");
        let mut request = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .header(CONTENT_TYPE, "application/json")
            .header("X-Title", self.config.x_title.as_str())
            .timeout(timeout)
            .json(payload);
        if let Some(referer) = self.config.http_referer.as_deref() {
            request = request.header("HTTP-Referer", referer);
        }
        let response = request
            .send()
            .map_err(|err| request_error(ProviderId::OpenRouter, err))?;
        response_json_or_error(ProviderId::OpenRouter, response)
    }

    /// Replaces remote `message.images` URLs with data URLs so the response
    /// can be classified without further I/O. Failed downloads are dropped,
    /// and no download runs past `deadline`.
    fn inline_remote_images(&self, completion: &mut ChatCompletion, deadline: Instant) {
        for choice in &mut completion.choices {
            let Some(message) = choice.message.as_mut() else {
                continue;
            };
            for entry in &mut message.images {
                let Some(image_url) = entry.image_url.as_mut() else {
                    continue;
                };
                let url = image_url.url.trim().to_string();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    continue;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!(%url, "attempt deadline reached, dropping remote OpenRouter image");
                    image_url.url.clear();
                    continue;
                }
                match self.download_image(&url, remaining) {
                    Ok(data_url) => image_url.url = data_url,
                    Err(err) => {
                        warn!(%url, error = %err, "dropping undownloadable OpenRouter image");
                        image_url.url.clear();
                    }
                }
            }
        }
    }

    fn download_image(&self, url: &str, timeout: Duration) -> anyhow::Result<String> {
        let response = self.http.get(url).timeout(timeout).send()?;
        if !response.status().is_success() {
            anyhow::bail!("image download failed ({})", response.status().as_u16());
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = response.bytes()?;
        Ok(format!("data:{mime_type};base64,{}", BASE64.encode(&bytes)))
    }
}

impl ProviderAdapter for OpenRouterAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn generate(&self, request: &AdapterRequest<'_>) -> Result<ProviderResponse, TransportError> {
        let deadline = Instant::now() + request.timeout;
        let payload = Self::build_generation_payload(request);
        let raw = self.post(&payload, request.timeout)?;
        let mut completion: ChatCompletion = serde_json::from_value(raw).map_err(|err| {
            TransportError::new(
                ProviderId::OpenRouter,
                None,
                format!("unexpected chat completion shape: {err}"),
            )
        })?;
        self.inline_remote_images(&mut completion, deadline);
        Ok(ProviderResponse::OpenRouter(completion))
    }

    fn describe(&self, request: &DescribeRequest<'_>) -> Result<String, TransportError> {
        let payload = Self::build_describe_payload(request);
        let raw = self.post(&payload, request.timeout)?;
        let completion: ChatCompletion = serde_json::from_value(raw).map_err(|err| {
            TransportError::new(
                ProviderId::OpenRouter,
                None,
                format!("unexpected chat completion shape: {err}"),
            )
        })?;
        if let Some(error) = completion.error() {
            return Err(TransportError::new(ProviderId::OpenRouter, None, error));
        }
        Ok(completion.text())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatCompletion {
    #[serde(deserialize_with = "null_as_default")]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Choice {
    pub finish_reason: Option<String>,
    pub native_finish_reason: Option<String>,
    pub message: Option<Message>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Message {
    pub content: Option<MessageContent>,
    #[serde(deserialize_with = "null_as_default")]
    pub images: Vec<ImageEntry>,
}

/// `message.content` arrives as plain text, a part array, or `{parts: [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Object(ContentObject),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentObject {
    #[serde(deserialize_with = "null_as_default")]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
    #[serde(alias = "inlineData")]
    pub inline_data: Option<InlineData>,
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InlineData {
    #[serde(deserialize_with = "null_as_default")]
    pub data: String,
    #[serde(alias = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageEntry {
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageUrl {
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Usage {
    #[serde(deserialize_with = "null_as_default")]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiError {
    pub message: Option<String>,
    pub code: Option<Value>,
}

impl ApiError {
    fn describe(&self) -> String {
        api_error_text(self.message.as_deref(), self.code.as_ref())
    }
}

impl ChatCompletion {
    fn error(&self) -> Option<String> {
        self.error
            .as_ref()
            .or_else(|| self.choices.first().and_then(|choice| choice.error.as_ref()))
            .map(ApiError::describe)
    }

    /// Concatenated text parts of the first choice.
    pub fn text(&self) -> String {
        let Some(content) = self
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_ref())
        else {
            return String::new();
        };
        match content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) | MessageContent::Object(ContentObject { parts }) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn classify(&self) -> RawOutcome {
        if let Some(error) = self.error() {
            return RawOutcome::ProviderError(error);
        }
        let Some(choice) = self.choices.first() else {
            return RawOutcome::Empty;
        };

        if let Some(reason) = [
            choice.native_finish_reason.as_deref(),
            choice.finish_reason.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|reason| is_safety_reason(reason))
        {
            return RawOutcome::SafetyBlocked(reason.to_ascii_uppercase());
        }

        let Some(message) = choice.message.as_ref() else {
            return RawOutcome::Empty;
        };
        let completion_tokens = self
            .usage
            .as_ref()
            .map(|usage| usage.completion_tokens)
            .unwrap_or(0);
        let content_empty = match &message.content {
            None => true,
            Some(MessageContent::Text(text)) => text.trim().is_empty(),
            Some(MessageContent::Parts(parts))
            | Some(MessageContent::Object(ContentObject { parts })) => parts.is_empty(),
        };
        if content_empty && completion_tokens == 0 && message.images.is_empty() {
            return RawOutcome::Empty;
        }

        let mut images = Vec::new();
        if let Some(MessageContent::Parts(parts) | MessageContent::Object(ContentObject { parts })) =
            &message.content
        {
            for part in parts {
                if let Some(image) = part_image(part) {
                    images.push(image);
                }
            }
        }
        for entry in &message.images {
            if let Some(image) = entry
                .image_url
                .as_ref()
                .and_then(|image_url| InlineImage::from_data_url(&image_url.url))
            {
                images.push(image);
            }
        }

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

fn is_safety_reason(reason: &str) -> bool {
    reason.eq_ignore_ascii_case("SAFETY") || reason.eq_ignore_ascii_case("IMAGE_SAFETY")
}

fn part_image(part: &ContentPart) -> Option<InlineImage> {
    if let Some(inline) = part.inline_data.as_ref().filter(|inline| !inline.data.is_empty()) {
        return Some(InlineImage {
            mime_type: inline
                .mime_type
                .clone()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "image/png".to_string()),
            data: inline.data.clone(),
        });
    }
    part.image_url
        .as_ref()
        .and_then(|image_url| InlineImage::from_data_url(&image_url.url))
}
