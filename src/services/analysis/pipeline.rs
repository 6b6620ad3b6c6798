// Analysis Pipeline
// Sequences segmentation, chunking, classification and aggregation for
// `analyze`, and drives the debate orchestrator for `debate`.

use crate::error::{PipelineError, Stage};
use crate::models::{AggregatedResult, AnalyzeResponse, ArgumentSet, Chunk, ClassifierKind, SentenceSpan};
use crate::services::config_store::{AppConfig, ClassifierConfig};
use crate::services::providers::{get_api_key, ProviderClient};
use crate::services::sentence_segmenter::SentenceSegmenter;
use crate::services::text_processor::{EstimatingTokenCounter, TokenCounter};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::aggregation::aggregate_predictions;
use super::chunk_builder::build_chunks;
use super::classifier::{
    classify_chunks, ClassifierProfile, ClassifierSlot, InferenceClassifier, InvocationSettings,
};
use super::debate::{DebateOrchestrator, DebateSettings, OpenAiChatGenerator};

/// Request-scoped entry point for both public operations.
///
/// Holds only read-only collaborators, so one instance can serve concurrent
/// requests behind an `Arc`.
pub struct AnalysisService {
    segmenter: SentenceSegmenter,
    slots: BTreeMap<ClassifierKind, ClassifierSlot>,
    invocation: InvocationSettings,
    debate: DebateOrchestrator,
}

#[cfg(feature = "hf-tokenizer")]
fn token_counter_for(config: &ClassifierConfig) -> Result<Arc<dyn TokenCounter>, PipelineError> {
    use crate::services::text_processor::HfTokenCounter;

    match &config.tokenizer_path {
        Some(path) => {
            let counter = HfTokenCounter::from_file(path).map_err(PipelineError::Config)?;
            Ok(Arc::new(counter))
        }
        None => Ok(Arc::new(EstimatingTokenCounter)),
    }
}

#[cfg(not(feature = "hf-tokenizer"))]
fn token_counter_for(config: &ClassifierConfig) -> Result<Arc<dyn TokenCounter>, PipelineError> {
    if let Some(path) = &config.tokenizer_path {
        warn!(
            "[PIPELINE] tokenizer {} ignored, built without hf-tokenizer; using estimate",
            path.display()
        );
    }
    Ok(Arc::new(EstimatingTokenCounter))
}

impl AnalysisService {
    pub fn new(
        segmenter: SentenceSegmenter,
        invocation: InvocationSettings,
        debate: DebateOrchestrator,
    ) -> Self {
        Self {
            segmenter,
            slots: BTreeMap::new(),
            invocation,
            debate,
        }
    }

    /// Register (or replace) the classifier for the slot's kind.
    pub fn with_classifier(mut self, slot: ClassifierSlot) -> Self {
        self.slots.insert(slot.kind(), slot);
        self
    }

    /// Wire hosted classifiers and the chat generator from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let client = match config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(proxy) => ProviderClient::with_proxy(proxy)
                .map_err(|e| PipelineError::Config(format!("invalid proxy {}: {}", proxy, e)))?,
            None => ProviderClient::new(),
        };
        let client = Arc::new(client);

        let invocation = InvocationSettings {
            concurrency: config.analysis.chunk_concurrency,
            attempts: config.analysis.chunk_attempts,
            timeout: config.analysis.classify_timeout(),
            ..InvocationSettings::default()
        };

        let openai_key = get_api_key("openai").unwrap_or_default();
        if openai_key.is_empty() {
            warn!("[PIPELINE] no OpenAI API key configured; debate calls will fail");
        }
        let generator = OpenAiChatGenerator::new(client.clone(), &config.debate, openai_key);
        let debate = DebateOrchestrator::new(Arc::new(generator), DebateSettings::from(&config.debate));

        let mut service = Self::new(
            SentenceSegmenter::new(config.analysis.min_chars),
            invocation,
            debate,
        );

        let hf_token = get_api_key("huggingface");
        for kind in ClassifierKind::ALL {
            let cfg = config.analysis.classifier(kind);
            let mut profile = ClassifierProfile::for_kind(kind, cfg.token_budget);
            if !cfg.label_priority.is_empty() {
                profile = profile.with_priority(cfg.label_priority.clone())?;
            }
            let endpoint = cfg.resolve_endpoint(kind);
            info!("[PIPELINE] {} classifier endpoint: {}", kind, endpoint);
            let classifier =
                InferenceClassifier::new(client.clone(), endpoint, hf_token.clone(), profile.labels().len());
            let tokens = token_counter_for(cfg)?;
            service = service.with_classifier(ClassifierSlot::new(profile, Arc::new(classifier), tokens));
        }

        Ok(service)
    }

    pub fn segmenter(&self) -> &SentenceSegmenter {
        &self.segmenter
    }

    pub fn kinds(&self) -> Vec<ClassifierKind> {
        self.slots.keys().copied().collect()
    }

    fn slot(&self, kind: ClassifierKind) -> Result<&ClassifierSlot, PipelineError> {
        self.slots.get(&kind).ok_or(PipelineError::MissingClassifier(kind))
    }

    /// Chunks `kind`'s classifier would receive for `text`, without calling it.
    pub fn plan_chunks(&self, kind: ClassifierKind, text: &str) -> Result<Vec<Chunk>, PipelineError> {
        let slot = self.slot(kind)?;
        let spans = self.segmenter.segment(text)?;
        Ok(build_chunks(text, &spans, slot.profile.token_budget, slot.tokens.as_ref()))
    }

    /// Bias and emotion verdicts for `text`.
    pub async fn analyze(&self, text: &str) -> Result<AnalyzeResponse, PipelineError> {
        self.analyze_with_cancel(text, &CancellationToken::new()).await
    }

    pub async fn analyze_with_cancel(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalyzeResponse, PipelineError> {
        self.analyze_kinds(text, &ClassifierKind::ALL, cancel).await
    }

    /// Verdicts for the requested kinds only. Kinds run concurrently; the
    /// first request-level failure stops the other kind.
    pub async fn analyze_kinds(
        &self,
        text: &str,
        kinds: &[ClassifierKind],
        cancel: &CancellationToken,
    ) -> Result<AnalyzeResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        if kinds.is_empty() {
            return Err(PipelineError::Config("no classifier kinds requested".to_string()));
        }
        for kind in kinds {
            self.slot(*kind)?;
        }

        let spans = self.segmenter.segment(text)?;
        info!(
            "[PIPELINE] analyze request={} chars={} sentences={} kinds={:?}",
            request_id,
            text.trim().chars().count(),
            spans.len(),
            kinds
        );

        let stop = cancel.child_token();
        let spans = spans.as_slice();
        let stop = &stop;
        let run = move |kind: ClassifierKind| async move {
            if !kinds.contains(&kind) {
                return None;
            }
            let res = self.classify_kind(kind, text, spans, stop).await;
            if res.is_err() {
                stop.cancel();
            }
            Some(res)
        };
        let (bias, emotion) = tokio::join!(run(ClassifierKind::Bias), run(ClassifierKind::Emotion));

        let (bias, emotion) = match (bias, emotion) {
            (Some(Err(a)), Some(Err(b))) => return Err(pick_failure(a, b)),
            (Some(Err(e)), _) | (_, Some(Err(e))) => return Err(e),
            (bias, emotion) => (
                bias.and_then(Result::ok),
                emotion.and_then(Result::ok),
            ),
        };

        let partial = bias.iter().chain(emotion.iter()).any(AggregatedResult::is_partial);
        info!(
            "[PIPELINE] analyze request={} done partial={} bias={} emotion={} elapsed_ms={}",
            request_id,
            partial,
            bias.as_ref().map(|r| r.label()).unwrap_or("-"),
            emotion.as_ref().map(|r| r.label()).unwrap_or("-"),
            started.elapsed().as_millis()
        );

        Ok(AnalyzeResponse {
            request_id,
            created_at: Utc::now(),
            bias,
            emotion,
            partial,
            source_bias: None,
        })
    }

    async fn classify_kind(
        &self,
        kind: ClassifierKind,
        text: &str,
        spans: &[SentenceSpan],
        cancel: &CancellationToken,
    ) -> Result<AggregatedResult, PipelineError> {
        let slot = self.slot(kind)?;
        let chunks = build_chunks(text, spans, slot.profile.token_budget, slot.tokens.as_ref());
        let oversized = chunks
            .iter()
            .filter(|c| c.is_oversized(slot.profile.token_budget))
            .count();
        info!(
            "[PIPELINE] {} chunks={} oversized={} budget={}",
            kind,
            chunks.len(),
            oversized,
            slot.profile.token_budget
        );

        let outcome = classify_chunks(slot, &chunks, &self.invocation, cancel).await?;
        let unavailable = || PipelineError::ClassificationUnavailable {
            kind,
            attempted: chunks.len(),
            last_error: outcome
                .failures
                .last()
                .map(|f| f.reason.clone())
                .unwrap_or_else(|| "no chunks to classify".to_string()),
        };

        let aggregate = aggregate_predictions(&slot.profile, &outcome.predictions)
            .ok_or_else(unavailable)?;

        if !outcome.failures.is_empty() {
            warn!(
                "[PIPELINE] {} partial result: {}/{} chunks failed",
                kind,
                outcome.failures.len(),
                chunks.len()
            );
        }

        Ok(AggregatedResult {
            kind,
            distribution: aggregate.distribution,
            method: aggregate.method,
            chunk_count: aggregate.chunk_count,
            failed_chunks: outcome.failures,
        })
    }

    /// Claim and balanced arguments for `text`.
    pub async fn debate(&self, text: &str) -> Result<ArgumentSet, PipelineError> {
        self.debate_with_cancel(text, &CancellationToken::new()).await
    }

    pub async fn debate_with_cancel(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ArgumentSet, PipelineError> {
        let text = self.segmenter.validate(text)?;
        info!("[PIPELINE] debate chars={}", text.chars().count());
        self.debate.run(text, cancel).await
    }
}

/// The failure that caused the other kind to be stopped wins over the
/// resulting cancellation.
fn pick_failure(a: PipelineError, b: PipelineError) -> PipelineError {
    match (&a, &b) {
        (PipelineError::Cancelled(Stage::Classification(_)), other)
            if !matches!(other, PipelineError::Cancelled(_)) =>
        {
            b
        }
        _ => a,
    }
}
