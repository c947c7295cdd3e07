use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Remote backends the pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenRouter,
    Gemini,
}

impl ProviderId {
    /// Preference order used when no provider has been chosen explicitly.
    pub const ALL: [ProviderId; 2] = [ProviderId::OpenRouter, ProviderId::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Gemini => "gemini",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "OpenRouter",
            ProviderId::Gemini => "Gemini Direct",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openrouter" | "open-router" | "open_router" => Some(ProviderId::OpenRouter),
            "gemini" | "google" | "gemini-direct" => Some(ProviderId::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "Unknown provider '{}'; expected one of: {}.",
                s.trim(),
                ProviderId::ALL
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

pub trait NamedProvider {
    fn provider_id(&self) -> ProviderId;
}

#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    pub fn get(&self, id: ProviderId) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.provider_id() == id)
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.get(id).is_some()
    }

    pub fn list(&self) -> Vec<ProviderId> {
        let mut ids = self
            .providers
            .iter()
            .map(NamedProvider::provider_id)
            .collect::<Vec<ProviderId>>();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    /// First registered provider in `ProviderId::ALL` order that satisfies `accept`.
    pub fn first_matching(&self, accept: impl Fn(&T) -> bool) -> Option<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .find(|id| self.get(*id).map(&accept).unwrap_or(false))
    }
}
