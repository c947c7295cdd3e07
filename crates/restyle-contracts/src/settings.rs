use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::providers::ProviderId;

pub const PROVIDER_PREFERENCE_KEY: &str = "ai_provider";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Small JSON-object settings file.
///
/// Reads always go back to disk; writes merge the changed key into whatever
/// is on disk so unrelated keys written by other processes survive.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        read_json_object(&self.path)?.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if on_disk.get(key) == Some(&value) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }

    /// Stored provider preference. Unknown or malformed values read as unset.
    pub fn provider_preference(&self) -> Option<ProviderId> {
        self.get(PROVIDER_PREFERENCE_KEY)
            .as_ref()
            .and_then(Value::as_str)
            .and_then(ProviderId::parse)
    }

    pub fn set_provider_preference(&self, provider: ProviderId) -> anyhow::Result<()> {
        self.set(
            PROVIDER_PREFERENCE_KEY,
            Value::String(provider.as_str().to_string()),
        )
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
