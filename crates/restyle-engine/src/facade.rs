//! Provider-neutral entry point.
//!
//! The facade owns one adapter per provider and the model registry, picks the
//! active provider once at construction, and routes every call through it.

use anyhow::{Context, Result};
use restyle_contracts::events::EventWriter;
use restyle_contracts::generation::{ErrorKind, OrientationMode};
use restyle_contracts::models::{ModelRegistry, ModelSelector, CAPABILITY_IMAGE, CAPABILITY_VISION};
use restyle_contracts::providers::{ProviderId, ProviderRegistry};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::adapters::{
    DescribeRequest, EncodedImage, GeminiAdapter, OpenRouterAdapter, ProviderAdapter,
};
use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::orchestrator::{CancelToken, GenerationRequest, GenerationResult, Orchestrator};
use crate::preprocess::{compress_to_size_budget, load_with_orientation};
use crate::prompt::{BODY_POSE_INSTRUCTION, CLOTHING_ANALYSIS_INSTRUCTION};

const PARSE_FAILURE: &str = "Failed to parse structured response";

pub struct ProviderFacade {
    adapters: ProviderRegistry<Box<dyn ProviderAdapter>>,
    selector: ModelSelector,
    config: EngineConfig,
    active: ProviderId,
    model_overrides: Vec<String>,
    journal: Option<EventWriter>,
}

impl ProviderFacade {
    pub fn new(config: EngineConfig, preference: Option<ProviderId>) -> Self {
        let adapters: Vec<Box<dyn ProviderAdapter>> = vec![
            Box::new(OpenRouterAdapter::new(config.openrouter.clone())),
            Box::new(GeminiAdapter::new(config.gemini.clone())),
        ];
        Self::with_adapters(adapters, config, preference)
    }

    pub fn with_adapters(
        adapters: Vec<Box<dyn ProviderAdapter>>,
        config: EngineConfig,
        preference: Option<ProviderId>,
    ) -> Self {
        let adapters = ProviderRegistry::new(adapters);
        let active = resolve_active(&adapters, preference);
        info!(%active, ?preference, "active provider selected");
        Self {
            adapters,
            selector: ModelSelector::new(None),
            config,
            active,
            model_overrides: Vec::new(),
            journal: None,
        }
    }

    /// Facade bound to `provider`, failing instead of falling back when it has no key.
    pub fn pinned(config: EngineConfig, provider: ProviderId) -> Result<Self, PipelineError> {
        Self::new(config, None).pin(provider)
    }

    pub fn pin(mut self, provider: ProviderId) -> Result<Self, PipelineError> {
        if !self.is_available(provider) {
            return Err(PipelineError::ProviderUnavailable(provider));
        }
        debug!(%provider, "provider pinned");
        self.active = provider;
        Ok(self)
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.selector = ModelSelector::new(Some(registry));
        self
    }

    /// Models tried in order instead of the registry's image models.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.model_overrides = models;
        self
    }

    pub fn with_journal(mut self, journal: EventWriter) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn active(&self) -> ProviderId {
        self.active
    }

    pub fn is_available(&self, id: ProviderId) -> bool {
        self.adapters
            .get(id)
            .map(|adapter| adapter.is_configured())
            .unwrap_or(false)
    }

    pub fn available(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|id| self.is_available(*id))
            .collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, PipelineError> {
        let adapter = self.configured_adapter()?;
        let models = match self.selector.fallback_chain(
            self.active,
            CAPABILITY_IMAGE,
            &self.model_overrides,
        ) {
            Ok(models) => models,
            Err(message) => {
                warn!(provider = %self.active, %message, "no image models");
                return Ok(GenerationResult::failure(ErrorKind::Provider, message, 0));
            }
        };
        debug!(provider = %self.active, ?models, "generation fallback chain");
        Orchestrator::new(
            adapter,
            models,
            self.config.retry_policy(self.active),
            self.config.max_inline_chars,
        )
        .with_journal(self.journal.clone())
        .run(request, cancel)
    }

    /// Lists garments in the image as JSON.
    pub fn analyze_clothing(&self, image: &[u8]) -> Result<Value> {
        let text = self.describe(image, CLOTHING_ANALYSIS_INSTRUCTION)?;
        Ok(parse_structured(&text).unwrap_or_else(|| {
            json!({
                "clothing_items": [],
                "raw_analysis": text,
                "error": PARSE_FAILURE,
            })
        }))
    }

    /// Pose, proportions and landmarks of the person in the image as JSON.
    pub fn detect_body_pose(&self, image: &[u8]) -> Result<Value> {
        let text = self.describe(image, BODY_POSE_INSTRUCTION)?;
        Ok(parse_structured(&text).unwrap_or_else(|| {
            json!({
                "pose": {},
                "body_measurements": {},
                "landmarks": [],
                "raw_analysis": text,
                "error": PARSE_FAILURE,
            })
        }))
    }

    fn configured_adapter(&self) -> Result<&dyn ProviderAdapter, PipelineError> {
        match self.adapters.get(self.active) {
            Some(adapter) if adapter.is_configured() => Ok(&**adapter),
            _ => Err(PipelineError::ProviderUnavailable(self.active)),
        }
    }

    fn describe(&self, image: &[u8], instruction: &str) -> Result<String> {
        let adapter = self.configured_adapter()?;
        let selection = self
            .selector
            .select(None, self.active, CAPABILITY_VISION)
            .map_err(anyhow::Error::msg)?;
        let asset = load_with_orientation(image, OrientationMode::Heuristic, "image")?;
        let asset = compress_to_size_budget(&asset, self.config.max_inline_chars)?;
        let encoded = EncodedImage::from_asset(&asset);
        let policy = self.config.retry_policy(self.active);
        let text = adapter
            .describe(&DescribeRequest {
                model: &selection.model.name,
                instruction,
                image: &encoded,
                timeout: policy.request_timeout,
            })
            .with_context(|| format!("{} vision request failed", self.active.label()))?;
        debug!(model = %selection.model.name, chars = text.len(), "vision response");
        Ok(text)
    }
}

fn resolve_active(
    adapters: &ProviderRegistry<Box<dyn ProviderAdapter>>,
    preference: Option<ProviderId>,
) -> ProviderId {
    if let Some(preferred) = preference {
        if adapters
            .get(preferred)
            .map(|adapter| adapter.is_configured())
            .unwrap_or(false)
        {
            return preferred;
        }
        warn!(%preferred, "preferred provider not configured, falling back");
    }
    adapters
        .first_matching(|adapter| adapter.is_configured())
        .unwrap_or(ProviderId::OpenRouter)
}

/// JSON object from model text, tolerating a surrounding markdown fence.
fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str::<Value>(unfenced)
        .ok()
        .filter(Value::is_object)
}
