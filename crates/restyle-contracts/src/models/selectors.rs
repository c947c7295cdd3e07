use crate::providers::ProviderId;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        provider: ProviderId,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, provider, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable on {provider} for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(provider, capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available on {provider} for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }

    /// Ordered list of model names to try for one request.
    ///
    /// Explicit overrides are taken verbatim (providers accept ids the
    /// registry does not know about); otherwise every registered model for
    /// the provider and capability is used in registration order.
    pub fn fallback_chain(
        &self,
        provider: ProviderId,
        capability: &str,
        overrides: &[String],
    ) -> Result<Vec<String>, String> {
        let mut chain: Vec<String> = Vec::new();
        for name in overrides {
            let trimmed = name.trim();
            if trimmed.is_empty() || chain.iter().any(|existing| existing == trimmed) {
                continue;
            }
            chain.push(trimmed.to_string());
        }
        if !chain.is_empty() {
            return Ok(chain);
        }

        let chain: Vec<String> = self
            .registry
            .by_capability(provider, capability)
            .into_iter()
            .map(|model| model.name)
            .collect();
        if chain.is_empty() {
            return Err(format!(
                "No models available on {provider} for capability '{capability}'."
            ));
        }
        Ok(chain)
    }
}
