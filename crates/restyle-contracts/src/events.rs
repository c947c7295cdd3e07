use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::generation::{AttemptOutcome, ErrorKind};
use crate::providers::ProviderId;

/// One journal record. Never carries image bytes, only fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    GenerationStarted {
        provider: ProviderId,
        models: Vec<String>,
        source_sha256: String,
        target_sha256: String,
    },
    PreprocessFinished {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        compatibility_score: f64,
        resized_to_match: bool,
    },
    AttemptFinished {
        model: String,
        attempt: u32,
        outcome: AttemptOutcome,
        elapsed_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Backoff {
        model: String,
        attempt: u32,
        delay_ms: u64,
    },
    ModelFallback {
        from: String,
        to: String,
        reason: AttemptOutcome,
    },
    GenerationFinished {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        attempts: u32,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `request_id` and `ts`; event fields are
/// merged on top. One compact JSON object per line.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    request_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                request_id: request_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn record(&self, event: &PipelineEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert(
            "request_id".to_string(),
            Value::String(self.inner.request_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        match serde_json::to_value(event)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    line.insert(key, value);
                }
            }
            other => anyhow::bail!("journal event did not serialize to an object: {other}"),
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

pub fn new_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4().simple())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
