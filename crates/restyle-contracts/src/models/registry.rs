use indexmap::IndexMap;

use crate::providers::ProviderId;

pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_VISION: &str = "vision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: ProviderId,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Ordered model catalogue. Registration order is fallback order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, provider: ProviderId, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, provider: ProviderId, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.provider == provider && model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: ProviderId, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider,
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(
        "google/gemini-3-pro-image-preview",
        ProviderId::OpenRouter,
        &[CAPABILITY_IMAGE],
    );
    insert(
        "google/gemini-2.5-flash-image-preview",
        ProviderId::OpenRouter,
        &[CAPABILITY_IMAGE],
    );
    insert(
        "anthropic/claude-3.5-sonnet",
        ProviderId::OpenRouter,
        &[CAPABILITY_VISION],
    );
    insert(
        "gemini-3-pro-image-preview",
        ProviderId::Gemini,
        &[CAPABILITY_IMAGE],
    );
    insert(
        "gemini-2.5-flash-image",
        ProviderId::Gemini,
        &[CAPABILITY_IMAGE],
    );
    insert("gemini-2.0-flash", ProviderId::Gemini, &[CAPABILITY_VISION]);

    map
}
