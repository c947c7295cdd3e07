//! Multi-attempt generation protocol.
//!
//! Control flow is a pure transition function ([`next_step`]) over attempt
//! outcomes; [`Orchestrator::run`] performs the I/O and sleeps it asks for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use restyle_contracts::compatibility::{compare, CompatibilityReport, ImageAnalysis};
use restyle_contracts::events::{EventWriter, PipelineEvent};
use restyle_contracts::generation::{
    AttemptOutcome, ErrorKind, GenerationOptions, RetryPolicy,
};
use restyle_contracts::providers::ProviderId;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::adapters::{
    AdapterRequest, EncodedImage, InlineImage, ProviderAdapter, RawOutcome,
};
use crate::echo::is_echo_of_any;
use crate::error::PipelineError;
use crate::preprocess::{
    compress_to_size_budget, load_with_orientation, match_sizes, resize, ImageAsset,
    ResizeOptions,
};
use crate::prompt::transfer_prompt;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub source: Vec<u8>,
    pub target: Vec<u8>,
    pub style_prompt: Option<String>,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(source: Vec<u8>, target: Vec<u8>) -> Self {
        Self {
            source,
            target,
            style_prompt: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_style_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.style_prompt = Some(prompt.into());
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Caller-held flag checked before every attempt. An in-flight call is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success {
        image: InlineImage,
        description: String,
        provider: ProviderId,
        model: String,
        attempts: u32,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        soft: bool,
        attempts: u32,
    },
}

impl GenerationResult {
    /// Failure whose `soft` flag follows `kind`.
    pub fn failure(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        GenerationResult::Failure {
            kind,
            message: message.into(),
            soft: kind.is_soft(),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success { .. })
    }

    /// Credit is only ever consumed for a delivered image.
    pub fn should_charge(&self) -> bool {
        self.is_success()
    }

    pub fn attempts(&self) -> u32 {
        match self {
            GenerationResult::Success { attempts, .. }
            | GenerationResult::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn data_url(&self) -> Option<String> {
        match self {
            GenerationResult::Success { image, .. } => Some(image.data_url()),
            GenerationResult::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            GenerationResult::Success { .. } => None,
            GenerationResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Position in the fallback list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttemptCursor {
    pub model_index: usize,
    /// Zero-based attempt on the current model.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Finish,
    RetrySameModel { attempt: u32, delay: Duration },
    NextModel { index: usize },
    Exhausted,
    Fatal,
}

pub fn next_step(
    policy: &RetryPolicy,
    cursor: AttemptCursor,
    outcome: AttemptOutcome,
    model_count: usize,
) -> Step {
    match outcome {
        AttemptOutcome::Success => Step::Finish,
        AttemptOutcome::SafetyBlocked => Step::Fatal,
        AttemptOutcome::TransportError => advance_model(cursor, model_count),
        AttemptOutcome::EmptyResponse
        | AttemptOutcome::EchoedInput
        | AttemptOutcome::ProviderError => {
            if cursor.attempt < policy.max_retries {
                let attempt = cursor.attempt + 1;
                Step::RetrySameModel {
                    attempt,
                    delay: policy.backoff_for(attempt),
                }
            } else {
                advance_model(cursor, model_count)
            }
        }
    }
}

fn advance_model(cursor: AttemptCursor, model_count: usize) -> Step {
    let index = cursor.model_index + 1;
    if index < model_count {
        Step::NextModel { index }
    } else {
        Step::Exhausted
    }
}

/// Inputs after preprocessing, ready to inline.
#[derive(Debug, Clone)]
pub struct PreparedPair {
    pub source: ImageAsset,
    pub target: ImageAsset,
    pub compatibility: CompatibilityReport,
    pub resized_to_match: bool,
    pub prompt: String,
}

pub fn prepare(
    request: &GenerationRequest,
    max_inline_chars: usize,
) -> Result<PreparedPair, PipelineError> {
    let options = &request.options;
    let target = load_with_orientation(&request.target, options.orientation, "target")?;
    let source = load_with_orientation(&request.source, options.orientation, "source")?;

    let target_analysis = ImageAnalysis::new(
        target.width(),
        target.height(),
        request.target.len() as u64,
    );
    let source_analysis = ImageAnalysis::new(
        source.width(),
        source.height(),
        request.source.len() as u64,
    );
    for warning in target_analysis.warnings.iter().chain(&source_analysis.warnings) {
        debug!(%warning, "image analysis");
    }

    let resize_options = ResizeOptions {
        high_quality: options.high_quality,
        preserve_quality: options.preserve_quality,
    };
    let target = resize(&target, options.max_width, options.max_height, resize_options)?;
    let source = resize(&source, options.max_width, options.max_height, resize_options)?;

    let compatibility = compare(&source_analysis, &target_analysis);
    let resized_to_match = !options.preserve_target_dimensions
        && options.maintain_aspect_ratio
        && compatibility.should_match_sizes();
    let (source, target) = if resized_to_match {
        match_sizes(&source, &target, options.preserve_quality)?
    } else {
        (source, target)
    };

    let source = compress_to_size_budget(&source, max_inline_chars)?;
    let target = compress_to_size_budget(&target, max_inline_chars)?;
    let prompt = transfer_prompt(
        target.width(),
        target.height(),
        request.style_prompt.as_deref(),
        &compatibility,
    );

    Ok(PreparedPair {
        source,
        target,
        compatibility,
        resized_to_match,
        prompt,
    })
}

pub struct Orchestrator<'a> {
    adapter: &'a dyn ProviderAdapter,
    models: Vec<String>,
    policy: RetryPolicy,
    max_inline_chars: usize,
    journal: Option<EventWriter>,
}

struct AttemptReport {
    outcome: AttemptOutcome,
    detail: Option<String>,
    delivered: Option<(InlineImage, Option<String>)>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        adapter: &'a dyn ProviderAdapter,
        models: Vec<String>,
        policy: RetryPolicy,
        max_inline_chars: usize,
    ) -> Self {
        Self {
            adapter,
            models,
            policy,
            max_inline_chars,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Option<EventWriter>) -> Self {
        self.journal = journal;
        self
    }

    pub fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, PipelineError> {
        let provider = self.adapter.id();
        self.record(PipelineEvent::GenerationStarted {
            provider,
            models: self.models.clone(),
            source_sha256: fingerprint(&request.source),
            target_sha256: fingerprint(&request.target),
        });

        let prepared = prepare(request, self.max_inline_chars)?;
        self.record(PipelineEvent::PreprocessFinished {
            source_width: prepared.source.width(),
            source_height: prepared.source.height(),
            target_width: prepared.target.width(),
            target_height: prepared.target.height(),
            compatibility_score: prepared.compatibility.overall_score,
            resized_to_match: prepared.resized_to_match,
        });
        info!(
            %provider,
            score = prepared.compatibility.overall_score,
            source_chars = prepared.source.encoded_len(),
            target_chars = prepared.target.encoded_len(),
            "images prepared"
        );

        let source = EncodedImage::from_asset(&prepared.source);
        let target = EncodedImage::from_asset(&prepared.target);

        if self.models.is_empty() {
            let result = GenerationResult::failure(
                ErrorKind::Provider,
                format!("No image models configured for {}.", provider.label()),
                0,
            );
            self.finish(&result, None);
            return Ok(result);
        }

        let mut cursor = AttemptCursor::default();
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                info!(attempts, "generation cancelled before next attempt");
                return Err(PipelineError::Cancelled);
            }

            let model = self.models[cursor.model_index].as_str();
            let started = Instant::now();
            let report = self.attempt(model, &prepared.prompt, &source, &target);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            attempts += 1;
            info!(
                model,
                attempt = cursor.attempt,
                outcome = %report.outcome,
                elapsed_ms,
                "attempt finished"
            );
            self.record(PipelineEvent::AttemptFinished {
                model: model.to_string(),
                attempt: cursor.attempt,
                outcome: report.outcome,
                elapsed_ms,
                detail: report.detail.clone(),
            });

            match next_step(&self.policy, cursor, report.outcome, self.models.len()) {
                Step::Finish => {
                    let Some((image, description)) = report.delivered else {
                        unreachable!("a successful attempt always carries an image")
                    };
                    let result = GenerationResult::Success {
                        image,
                        description: description
                            .unwrap_or_else(|| "Clothing transfer completed successfully".to_string()),
                        provider,
                        model: model.to_string(),
                        attempts,
                    };
                    self.finish(&result, Some(model));
                    return Ok(result);
                }
                Step::Fatal => {
                    let reason = report.detail.unwrap_or_else(|| "SAFETY".to_string());
                    warn!(model, %reason, "generation blocked by safety filter");
                    let result = GenerationResult::failure(
                        ErrorKind::SafetyBlocked,
                        format!(
                            "Generation blocked by {} safety filters ({reason}). Try different or less revealing images.",
                            provider.label()
                        ),
                        attempts,
                    );
                    self.finish(&result, Some(model));
                    return Ok(result);
                }
                Step::RetrySameModel { attempt, delay } => {
                    debug!(model, attempt, ?delay, "backing off before retry");
                    self.record(PipelineEvent::Backoff {
                        model: model.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    cursor.attempt = attempt;
                }
                Step::NextModel { index } => {
                    let next_model = self.models[index].as_str();
                    info!(from = model, to = next_model, reason = %report.outcome, "falling back to next model");
                    self.record(PipelineEvent::ModelFallback {
                        from: model.to_string(),
                        to: next_model.to_string(),
                        reason: report.outcome,
                    });
                    cursor = AttemptCursor {
                        model_index: index,
                        attempt: 0,
                    };
                }
                Step::Exhausted => {
                    let message =
                        exhaustion_message(provider, report.outcome, report.detail.as_deref(), attempts);
                    warn!(last = %report.outcome, attempts, "all models and retries exhausted");
                    let result =
                        GenerationResult::failure(ErrorKind::NoImageGenerated, message, attempts);
                    self.finish(&result, None);
                    return Ok(result);
                }
            }
        }
    }

    fn attempt(
        &self,
        model: &str,
        prompt: &str,
        source: &EncodedImage,
        target: &EncodedImage,
    ) -> AttemptReport {
        let request = AdapterRequest {
            model,
            prompt,
            source,
            target,
            timeout: self.policy.request_timeout,
        };
        let response = match self.adapter.generate(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(model, error = %err, "transport failure");
                return AttemptReport {
                    outcome: AttemptOutcome::TransportError,
                    detail: Some(err.to_string()),
                    delivered: None,
                };
            }
        };

        match response.classify() {
            RawOutcome::Images {
                images,
                description,
            } => {
                let inputs = [source.data.as_str(), target.data.as_str()];
                let total = images.len();
                match images
                    .into_iter()
                    .find(|image| !is_echo_of_any(&image.data, inputs))
                {
                    Some(image) => AttemptReport {
                        outcome: AttemptOutcome::Success,
                        detail: None,
                        delivered: Some((image, description)),
                    },
                    None => {
                        warn!(model, total, "provider returned only copies of the inputs");
                        AttemptReport {
                            outcome: AttemptOutcome::EchoedInput,
                            detail: None,
                            delivered: None,
                        }
                    }
                }
            }
            RawOutcome::Empty => AttemptReport {
                outcome: AttemptOutcome::EmptyResponse,
                detail: None,
                delivered: None,
            },
            RawOutcome::SafetyBlocked(reason) => AttemptReport {
                outcome: AttemptOutcome::SafetyBlocked,
                detail: Some(reason),
                delivered: None,
            },
            RawOutcome::ProviderError(message) => AttemptReport {
                outcome: AttemptOutcome::ProviderError,
                detail: Some(message),
                delivered: None,
            },
        }
    }

    fn finish(&self, result: &GenerationResult, model: Option<&str>) {
        self.record(PipelineEvent::GenerationFinished {
            success: result.is_success(),
            model: model.map(str::to_string),
            error_kind: result.error_kind(),
            attempts: result.attempts(),
        });
    }

    fn record(&self, event: PipelineEvent) {
        let Some(journal) = self.journal.as_ref() else {
            return;
        };
        if let Err(err) = journal.record(&event) {
            warn!(path = %journal.path().display(), error = %err, "journal write failed");
        }
    }
}

fn exhaustion_message(
    provider: ProviderId,
    last: AttemptOutcome,
    detail: Option<&str>,
    attempts: u32,
) -> String {
    let detail = detail.unwrap_or("no details");
    match last {
        AttemptOutcome::EchoedInput => "The AI returned an identical or near-identical image instead of generating a new one. Use retry to try again; you have not been charged.".to_string(),
        AttemptOutcome::ProviderError => format!(
            "{} reported an error after {attempts} attempts: {detail}. Please retry; you have not been charged.",
            provider.label()
        ),
        AttemptOutcome::TransportError => format!(
            "Could not get a response from {} ({detail}). Please retry in a moment; you have not been charged.",
            provider.label()
        ),
        AttemptOutcome::Success | AttemptOutcome::EmptyResponse | AttemptOutcome::SafetyBlocked => format!(
            "The AI model returned no image after {attempts} attempts. This is usually temporary; please retry. You have not been charged."
        ),
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use image::ImageFormat;
    use restyle_contracts::generation::OrientationMode;
    use serde_json::{json, Value};

    use super::*;
    use crate::adapters::{DescribeRequest, ProviderResponse};
    use crate::error::TransportError;
    use crate::preprocess::fixtures::{encode, jpeg, noise, with_exif_orientation};
    use crate::preprocess::DEFAULT_MAX_INLINE_CHARS;

    enum Scripted {
        Respond(Value),
        EchoTarget,
        Fail(u16),
    }

    #[derive(Debug, Clone)]
    struct Seen {
        model: String,
        source_len: usize,
        target_len: usize,
    }

    struct ScriptedAdapter {
        script: Mutex<VecDeque<Scripted>>,
        seen: Mutex<Vec<Seen>>,
        on_call: Option<CancelToken>,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
                on_call: None,
            }
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ProviderAdapter for ScriptedAdapter {
        fn id(&self) -> ProviderId {
            ProviderId::Gemini
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn generate(
            &self,
            request: &AdapterRequest<'_>,
        ) -> Result<ProviderResponse, TransportError> {
            self.seen.lock().unwrap().push(Seen {
                model: request.model.to_string(),
                source_len: request.source.data.len(),
                target_len: request.target.data.len(),
            });
            if let Some(token) = &self.on_call {
                token.cancel();
            }
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Scripted::Respond(json!({})));
            let body = match next {
                Scripted::Respond(body) => body,
                Scripted::EchoTarget => image_body(&request.target.data),
                Scripted::Fail(status) => {
                    return Err(TransportError::new(
                        ProviderId::Gemini,
                        Some(status),
                        "upstream unavailable",
                    ))
                }
            };
            Ok(ProviderResponse::Gemini(
                serde_json::from_value(body).unwrap(),
            ))
        }

        fn describe(&self, _request: &DescribeRequest<'_>) -> Result<String, TransportError> {
            Ok(String::new())
        }
    }

    fn image_body(data: &str) -> Value {
        json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": data}}]}
            }]
        })
    }

    fn fresh_image() -> Value {
        image_body("RlJFU0hfR0VORVJBVEVEX0lNQUdF")
    }

    fn empty() -> Value {
        json!({"candidates": [{"finishReason": "STOP", "content": {"parts": []}}]})
    }

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO, Duration::from_secs(15))
    }

    fn portrait_request() -> GenerationRequest {
        GenerationRequest::new(jpeg(1024, 1536), jpeg(1024, 1536))
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn transition_table() {
        let policy = quick_policy(2);
        let at = |model_index, attempt| AttemptCursor {
            model_index,
            attempt,
        };
        assert_eq!(
            next_step(&policy, at(0, 0), AttemptOutcome::Success, 2),
            Step::Finish
        );
        assert_eq!(
            next_step(&policy, at(0, 0), AttemptOutcome::SafetyBlocked, 2),
            Step::Fatal
        );
        assert_eq!(
            next_step(&policy, at(0, 0), AttemptOutcome::TransportError, 2),
            Step::NextModel { index: 1 }
        );
        assert_eq!(
            next_step(&policy, at(1, 0), AttemptOutcome::TransportError, 2),
            Step::Exhausted
        );
        assert_eq!(
            next_step(&policy, at(0, 1), AttemptOutcome::EchoedInput, 2),
            Step::RetrySameModel {
                attempt: 2,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            next_step(&policy, at(0, 2), AttemptOutcome::EmptyResponse, 2),
            Step::NextModel { index: 1 }
        );
        assert_eq!(
            next_step(&policy, at(1, 2), AttemptOutcome::ProviderError, 2),
            Step::Exhausted
        );
    }

    #[test]
    fn backoff_grows_linearly_with_attempt_index() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2), Duration::from_secs(60));
        let delays: Vec<Duration> = (0..4)
            .map(|attempt| {
                match next_step(
                    &policy,
                    AttemptCursor {
                        model_index: 0,
                        attempt,
                    },
                    AttemptOutcome::EmptyResponse,
                    1,
                ) {
                    Step::RetrySameModel { delay, .. } => delay,
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn first_attempt_success_returns_image() {
        let adapter = ScriptedAdapter::new(vec![Scripted::Respond(fresh_image())]);
        let orchestrator = Orchestrator::new(
            &adapter,
            models(&["gemini-3-pro-image-preview"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        );
        let result = orchestrator
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        assert!(result.should_charge());
        assert_eq!(result.attempts(), 1);
        assert_eq!(
            result.data_url().as_deref(),
            Some("data:image/png;base64,RlJFU0hfR0VORVJBVEVEX0lNQUdF")
        );
        assert_eq!(adapter.seen().len(), 1);
    }

    #[test]
    fn safety_block_stops_after_one_attempt() {
        let adapter = ScriptedAdapter::new(vec![
            Scripted::Respond(json!({"candidates": [{"finishReason": "IMAGE_SAFETY"}]})),
            Scripted::Respond(fresh_image()),
        ]);
        let orchestrator = Orchestrator::new(
            &adapter,
            models(&["a", "b"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        );
        let result = orchestrator
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::SafetyBlocked));
        assert_eq!(result.attempts(), 1);
        assert!(!result.should_charge());
        let GenerationResult::Failure { soft, message, .. } = result else {
            panic!("expected failure");
        };
        assert!(!soft);
        assert!(message.contains("IMAGE_SAFETY"));
        assert_eq!(adapter.seen().len(), 1);
    }

    #[test]
    fn repeated_empty_responses_exhaust_single_model_softly() {
        let adapter = ScriptedAdapter::new(vec![
            Scripted::Respond(empty()),
            Scripted::Respond(empty()),
            Scripted::Respond(empty()),
            Scripted::Respond(fresh_image()),
        ]);
        let orchestrator = Orchestrator::new(
            &adapter,
            models(&["only-model"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        );
        let result = orchestrator
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::NoImageGenerated));
        assert_eq!(result.attempts(), 3);
        let GenerationResult::Failure { soft, message, .. } = result else {
            panic!("expected failure");
        };
        assert!(soft);
        assert!(message.contains("not been charged"));
    }

    #[test]
    fn echoed_inputs_are_never_returned() {
        let adapter = ScriptedAdapter::new(vec![
            Scripted::EchoTarget,
            Scripted::EchoTarget,
            Scripted::Respond(fresh_image()),
        ]);
        let orchestrator = Orchestrator::new(
            &adapter,
            models(&["m"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        );
        let result = orchestrator
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.attempts(), 3);
        let GenerationResult::Success { image, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(image.data, "RlJFU0hfR0VORVJBVEVEX0lNQUdF");

        let always_echo = ScriptedAdapter::new(vec![
            Scripted::EchoTarget,
            Scripted::EchoTarget,
        ]);
        let result = Orchestrator::new(
            &always_echo,
            models(&["m"]),
            quick_policy(1),
            DEFAULT_MAX_INLINE_CHARS,
        )
        .run(&portrait_request(), &CancelToken::new())
        .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::NoImageGenerated));
        assert!(result.data_url().is_none());
    }

    #[test]
    fn transport_errors_skip_straight_to_next_model() {
        let adapter = ScriptedAdapter::new(vec![
            Scripted::Fail(503),
            Scripted::Respond(empty()),
            Scripted::Respond(fresh_image()),
        ]);
        let orchestrator = Orchestrator::new(
            &adapter,
            models(&["first", "second"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        );
        let result = orchestrator
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        let GenerationResult::Success {
            model, attempts, ..
        } = result
        else {
            panic!("expected success");
        };
        assert_eq!(model, "second");
        assert_eq!(attempts, 3);
        let called: Vec<String> = adapter.seen().into_iter().map(|seen| seen.model).collect();
        assert_eq!(called, vec!["first", "second", "second"]);
    }

    #[test]
    fn attempts_are_bounded_per_model_and_overall() {
        for retries in 0..=RetryPolicy::MAX_RETRIES_CEILING {
            let adapter = ScriptedAdapter::new(Vec::new());
            let names = ["a", "b", "c"];
            let result = Orchestrator::new(
                &adapter,
                models(&names),
                quick_policy(retries),
                DEFAULT_MAX_INLINE_CHARS,
            )
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
            let seen = adapter.seen();
            assert_eq!(seen.len() as u32, (retries + 1) * names.len() as u32);
            assert_eq!(result.attempts() as usize, seen.len());
            for name in names {
                let per_model = seen.iter().filter(|item| item.model == name).count() as u32;
                assert!(per_model <= retries + 1);
            }
        }
    }

    #[test]
    fn last_provider_error_text_is_reported_on_exhaustion() {
        let adapter = ScriptedAdapter::new(vec![Scripted::Respond(json!({
            "error": {"code": 400, "message": "Image too large", "status": "INVALID_ARGUMENT"}
        }))]);
        let result = Orchestrator::new(
            &adapter,
            models(&["m"]),
            quick_policy(0),
            DEFAULT_MAX_INLINE_CHARS,
        )
        .run(&portrait_request(), &CancelToken::new())
        .unwrap();
        let GenerationResult::Failure {
            kind,
            message,
            soft,
            ..
        } = result
        else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::NoImageGenerated);
        assert!(soft);
        assert!(message.contains("INVALID_ARGUMENT: Image too large"));
    }

    #[test]
    fn transport_exhaustion_is_a_soft_no_image_failure() {
        let adapter = ScriptedAdapter::new(vec![Scripted::Fail(503), Scripted::Fail(502)]);
        let result = Orchestrator::new(
            &adapter,
            models(&["first", "second"]),
            quick_policy(0),
            DEFAULT_MAX_INLINE_CHARS,
        )
        .run(&portrait_request(), &CancelToken::new())
        .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::NoImageGenerated));
        assert_eq!(result.attempts(), 2);
        assert!(!result.should_charge());
        let GenerationResult::Failure { soft, message, .. } = result else {
            panic!("expected failure");
        };
        assert!(soft);
        assert!(message.contains("upstream unavailable"));
    }

    #[test]
    fn empty_model_list_is_a_hard_failure() {
        let adapter = ScriptedAdapter::new(vec![Scripted::Respond(fresh_image())]);
        let result = Orchestrator::new(&adapter, Vec::new(), quick_policy(2), DEFAULT_MAX_INLINE_CHARS)
            .run(&portrait_request(), &CancelToken::new())
            .unwrap();
        let GenerationResult::Failure { kind, soft, attempts, .. } = result else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::Provider);
        assert_eq!(soft, kind.is_soft());
        assert!(!soft);
        assert_eq!(attempts, 0);
        assert!(adapter.seen().is_empty());
    }

    #[test]
    fn cancellation_prevents_the_next_attempt() {
        let token = CancelToken::new();
        let mut adapter = ScriptedAdapter::new(vec![
            Scripted::Respond(empty()),
            Scripted::Respond(fresh_image()),
        ]);
        adapter.on_call = Some(token.clone());
        let err = Orchestrator::new(
            &adapter,
            models(&["m"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        )
        .run(&portrait_request(), &token)
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(adapter.seen().len(), 1);
    }

    #[test]
    fn undecodable_input_fails_before_any_attempt() {
        let adapter = ScriptedAdapter::new(vec![Scripted::Respond(fresh_image())]);
        let mut request = portrait_request();
        request.source.truncate(64);
        let err = Orchestrator::new(
            &adapter,
            models(&["m"]),
            quick_policy(2),
            DEFAULT_MAX_INLINE_CHARS,
        )
        .run(&request, &CancelToken::new())
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Decode));
        assert!(adapter.seen().is_empty());
    }

    #[test]
    fn oversized_inputs_are_compressed_under_budget() {
        let source = encode(&noise(900, 700, 11), ImageFormat::Png);
        let target = encode(&noise(700, 900, 5), ImageFormat::Png);
        let budget = 400_000;
        assert!(source.len() > budget && target.len() > budget);

        let adapter = ScriptedAdapter::new(vec![Scripted::Respond(fresh_image())]);
        let request = GenerationRequest::new(source, target);
        let result = Orchestrator::new(&adapter, models(&["m"]), quick_policy(0), budget)
            .run(&request, &CancelToken::new())
            .unwrap();
        assert!(result.is_success());
        let seen = adapter.seen();
        assert!(seen[0].source_len <= budget);
        assert!(seen[0].target_len <= budget);
    }

    #[test]
    fn portrait_tagged_six_keeps_its_dimensions_under_heuristic() {
        let target = with_exif_orientation(&jpeg(600, 900), 6);
        let request = GenerationRequest::new(jpeg(600, 900), target);
        let prepared = prepare(&request, DEFAULT_MAX_INLINE_CHARS).unwrap();
        assert_eq!((prepared.target.width(), prepared.target.height()), (600, 900));
        assert!(prepared.prompt.contains("600×900"));

        let mut strict = request.clone();
        strict.options.orientation = OrientationMode::Strict;
        let prepared = prepare(&strict, DEFAULT_MAX_INLINE_CHARS).unwrap();
        assert_eq!((prepared.target.width(), prepared.target.height()), (900, 600));
    }

    #[test]
    fn size_matching_only_when_target_dimensions_are_not_preserved() {
        let request = GenerationRequest::new(jpeg(200, 200), jpeg(1000, 1500));
        let kept = prepare(&request, DEFAULT_MAX_INLINE_CHARS).unwrap();
        assert!(kept.compatibility.should_match_sizes());
        assert!(!kept.resized_to_match);

        let options = GenerationOptions {
            preserve_target_dimensions: false,
            ..GenerationOptions::default()
        };
        let matched = prepare(&request.with_options(options), DEFAULT_MAX_INLINE_CHARS).unwrap();
        assert!(matched.resized_to_match);
        assert_eq!(
            (matched.source.width(), matched.source.height()),
            (683, 683)
        );
    }

    #[test]
    fn journal_records_attempts_without_image_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let adapter = ScriptedAdapter::new(vec![
            Scripted::Respond(empty()),
            Scripted::Respond(fresh_image()),
        ]);
        Orchestrator::new(&adapter, models(&["m"]), quick_policy(2), DEFAULT_MAX_INLINE_CHARS)
            .with_journal(Some(EventWriter::new(&path, "req-test")))
            .run(&portrait_request(), &CancelToken::new())?;

        let content = std::fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "generation_started",
                "preprocess_finished",
                "attempt_finished",
                "backoff",
                "attempt_finished",
                "generation_finished"
            ]
        );
        assert!(!content.contains("RlJFU0hf"));
        Ok(())
    }
}
