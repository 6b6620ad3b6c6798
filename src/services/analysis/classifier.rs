// Classifier Invoker
// Sends each chunk to a kind-specific sequence classifier with bounded
// concurrency and per-call deadlines. A failing chunk is recorded and left out;
// it never aborts the other chunks.

use crate::error::{CallError, PipelineError, Stage};
use crate::models::{Chunk, ChunkFailure, ChunkPrediction, ClassProbabilities, ClassifierKind};
use crate::services::providers::{LabelScore, ProviderClient, ProviderError};
use crate::services::text_processor::TokenCounter;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scores closer than this are treated as tied.
pub const TIE_EPSILON: f64 = 1e-12;
/// Accepted deviation of a classifier's raw score sum from 1.
const SUM_TOLERANCE: f64 = 1e-3;

/// `classify(text)` capability of one loaded model. Implementations must be
/// safe for concurrent read-only use.
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>, ProviderError>;
}

/// Label set, tie-break order and token budget of one classifier kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierProfile {
    pub kind: ClassifierKind,
    labels: Vec<String>,
    priority: Vec<String>,
    pub token_budget: usize,
}

impl ClassifierProfile {
    pub fn for_kind(kind: ClassifierKind, token_budget: usize) -> Self {
        Self {
            kind,
            labels: kind.default_labels().iter().map(|l| l.to_string()).collect(),
            priority: kind.default_priority().iter().map(|l| l.to_string()).collect(),
            token_budget,
        }
    }

    /// Replace the tie-break order. It must name every label exactly once.
    pub fn with_priority(mut self, priority: Vec<String>) -> Result<Self, PipelineError> {
        let given: BTreeSet<&str> = priority.iter().map(String::as_str).collect();
        let expected: BTreeSet<&str> = self.labels.iter().map(String::as_str).collect();
        if given != expected || priority.len() != self.labels.len() {
            return Err(PipelineError::Config(format!(
                "{} label priority must list each of {:?} once, got {:?}",
                self.kind, self.labels, priority
            )));
        }
        self.priority = priority;
        Ok(self)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Map a reported label onto the profile: case-insensitive name match, or
    /// the generic `LABEL_<i>` form indexing into the label list.
    pub fn resolve_label(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        if let Some(label) = self.labels.iter().find(|l| l.eq_ignore_ascii_case(raw)) {
            return Some(label.as_str());
        }
        let idx: usize = raw
            .strip_prefix("LABEL_")
            .or_else(|| raw.strip_prefix("label_"))?
            .parse()
            .ok()?;
        self.labels.get(idx).map(String::as_str)
    }

    /// Highest-scoring label; exact ties go to the label earliest in priority.
    pub fn argmax(&self, scores: &BTreeMap<String, f64>) -> (String, f64) {
        let mut best: Option<(&str, f64)> = None;
        for label in &self.priority {
            let score = scores.get(label).copied().unwrap_or(0.0);
            match best {
                Some((_, best_score)) if score <= best_score + TIE_EPSILON => {}
                _ => best = Some((label.as_str(), score)),
            }
        }
        best.map(|(l, s)| (l.to_string(), s)).unwrap_or_default()
    }

    /// Validate a classifier response and normalize it to sum to exactly 1.
    pub fn to_probabilities(&self, raw: &[LabelScore]) -> Result<ClassProbabilities, CallError> {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for entry in raw {
            let label = self.resolve_label(&entry.label).ok_or_else(|| {
                CallError::Malformed(format!("unknown {} label '{}'", self.kind, entry.label))
            })?;
            if !entry.score.is_finite() || entry.score < 0.0 || entry.score > 1.0 + SUM_TOLERANCE {
                return Err(CallError::Malformed(format!(
                    "score for '{}' is not a probability: {}",
                    label, entry.score
                )));
            }
            if scores.insert(label.to_string(), entry.score).is_some() {
                return Err(CallError::Malformed(format!("duplicate label '{}'", label)));
            }
        }

        if let Some(missing) = self.labels.iter().find(|l| !scores.contains_key(*l)) {
            return Err(CallError::Malformed(format!("missing label '{}'", missing)));
        }

        let total: f64 = scores.values().sum();
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(CallError::Malformed(format!(
                "scores sum to {:.4}, expected probabilities",
                total
            )));
        }
        for value in scores.values_mut() {
            *value /= total;
        }

        let (label, confidence) = self.argmax(&scores);
        Ok(ClassProbabilities {
            label,
            confidence,
            scores,
        })
    }
}

/// One registered classifier: profile, model and its tokenizer.
#[derive(Clone)]
pub struct ClassifierSlot {
    pub profile: Arc<ClassifierProfile>,
    pub classifier: Arc<dyn SequenceClassifier>,
    pub tokens: Arc<dyn TokenCounter>,
}

impl ClassifierSlot {
    pub fn new(
        profile: ClassifierProfile,
        classifier: Arc<dyn SequenceClassifier>,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            classifier,
            tokens,
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        self.profile.kind
    }
}

#[derive(Debug, Clone)]
pub struct InvocationSettings {
    pub concurrency: usize,
    pub attempts: usize,
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            attempts: 1,
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(400),
        }
    }
}

/// Per-chunk results for one classifier kind, ordered by chunk index.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub predictions: Vec<ChunkPrediction>,
    pub failures: Vec<ChunkFailure>,
}

async fn classify_once(
    classifier: &dyn SequenceClassifier,
    profile: &ClassifierProfile,
    text: &str,
    timeout: Duration,
) -> Result<ClassProbabilities, CallError> {
    match tokio::time::timeout(timeout, classifier.classify(text)).await {
        Ok(Ok(raw)) => profile.to_probabilities(&raw),
        Ok(Err(e)) => Err(CallError::Provider(e)),
        Err(_) => Err(CallError::Timeout(timeout)),
    }
}

async fn classify_with_retry(
    slot: &ClassifierSlot,
    semaphore: &Semaphore,
    chunk_index: usize,
    text: &str,
    settings: &InvocationSettings,
) -> Result<ClassProbabilities, CallError> {
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        // Permit is held only for the call itself, not across backoff.
        let res = match semaphore.acquire().await {
            Ok(_permit) => {
                classify_once(slot.classifier.as_ref(), &slot.profile, text, settings.timeout).await
            }
            Err(_) => Err(CallError::Malformed("classifier semaphore closed".to_string())),
        };

        match res {
            Ok(probs) => {
                if attempt > 1 {
                    info!(
                        "[CLASSIFIER] {} chunk={} succeeded on attempt {}",
                        slot.kind(),
                        chunk_index,
                        attempt
                    );
                }
                return Ok(probs);
            }
            Err(e) if attempt < attempts && e.is_retryable() => {
                warn!(
                    "[CLASSIFIER] {} chunk={} attempt={} failed, retrying: {}",
                    slot.kind(),
                    chunk_index,
                    attempt,
                    e
                );
                tokio::time::sleep(settings.retry_backoff * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Classify every chunk and wait for all of them before returning.
///
/// Only cancellation produces an error here; individual call failures end up
/// in [`ChunkOutcome::failures`].
pub async fn classify_chunks(
    slot: &ClassifierSlot,
    chunks: &[Chunk],
    settings: &InvocationSettings,
    cancel: &CancellationToken,
) -> Result<ChunkOutcome, PipelineError> {
    let kind = slot.kind();
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut join_set: JoinSet<(usize, Result<ClassProbabilities, CallError>)> = JoinSet::new();
    let mut pending: BTreeSet<usize> = BTreeSet::new();

    for chunk in chunks {
        let slot = slot.clone();
        let semaphore = semaphore.clone();
        let settings = settings.clone();
        let text = chunk.classifier_input().to_string();
        let chunk_index = chunk.index;
        pending.insert(chunk_index);

        join_set.spawn(async move {
            let res = classify_with_retry(&slot, &semaphore, chunk_index, &text, &settings).await;
            (chunk_index, res)
        });
    }

    let mut outcome = ChunkOutcome::default();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                join_set.abort_all();
                warn!("[CLASSIFIER] {} cancelled with {} chunks outstanding", kind, pending.len());
                return Err(PipelineError::Cancelled(Stage::Classification(kind)));
            }
            next = join_set.join_next() => match next {
                None => break,
                Some(Ok((chunk_index, Ok(probs)))) => {
                    pending.remove(&chunk_index);
                    debug!(
                        "[CLASSIFIER] {} chunk={} label={} confidence={:.3}",
                        kind, chunk_index, probs.label, probs.confidence
                    );
                    outcome.predictions.push(ChunkPrediction::new(chunk_index, probs));
                }
                Some(Ok((chunk_index, Err(e)))) => {
                    pending.remove(&chunk_index);
                    warn!("[CLASSIFIER] {} chunk={} failed: {}", kind, chunk_index, e);
                    outcome.failures.push(ChunkFailure {
                        chunk_index,
                        reason: e.to_string(),
                    });
                }
                Some(Err(e)) => {
                    warn!("[CLASSIFIER] {} chunk task failed: {}", kind, e);
                }
            }
        }
    }

    // Tasks that died without reporting back.
    for chunk_index in pending {
        outcome.failures.push(ChunkFailure {
            chunk_index,
            reason: "classification task aborted".to_string(),
        });
    }

    outcome.predictions.sort_by_key(|p| p.chunk_index);
    outcome.failures.sort_by_key(|f| f.chunk_index);
    info!(
        "[CLASSIFIER] {} done: ok={} failed={} elapsed_ms={}",
        kind,
        outcome.predictions.len(),
        outcome.failures.len(),
        started.elapsed().as_millis()
    );
    Ok(outcome)
}

/// Hosted text-classification endpoint (Hugging Face inference API shape).
pub struct InferenceClassifier {
    client: Arc<ProviderClient>,
    url: String,
    api_token: Option<String>,
    top_k: usize,
}

impl InferenceClassifier {
    pub fn new(
        client: Arc<ProviderClient>,
        url: impl Into<String>,
        api_token: Option<String>,
        top_k: usize,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_token,
            top_k,
        }
    }
}

#[async_trait]
impl SequenceClassifier for InferenceClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>, ProviderError> {
        self.client
            .call_text_classification(&self.url, self.api_token.as_deref(), text, self.top_k)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentenceSpan;
    use crate::services::text_processor::EstimatingTokenCounter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ls(label: &str, score: f64) -> LabelScore {
        LabelScore {
            label: label.to_string(),
            score,
        }
    }

    fn bias_profile() -> ClassifierProfile {
        ClassifierProfile::for_kind(ClassifierKind::Bias, 450)
    }

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            sentences: vec![SentenceSpan::new(0, text.len())],
            start: 0,
            end: text.len(),
            text: text.to_string(),
            token_count: 1,
        }
    }

    /// Fails for texts containing "FAIL", sleeps for texts containing "SLOW".
    struct ScriptedClassifier {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl ScriptedClassifier {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl SequenceClassifier for ScriptedClassifier {
        async fn classify(&self, text: &str) -> Result<Vec<LabelScore>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ProviderError::ApiError {
                    status: 503,
                    message: "loading".into(),
                });
            }
            if text.contains("SLOW") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if text.contains("FAIL") {
                return Err(ProviderError::MissingContent);
            }
            Ok(vec![ls("LABEL_0", 0.7), ls("LABEL_1", 0.2), ls("LABEL_2", 0.1)])
        }
    }

    fn slot(classifier: ScriptedClassifier) -> ClassifierSlot {
        ClassifierSlot::new(
            bias_profile(),
            Arc::new(classifier),
            Arc::new(EstimatingTokenCounter),
        )
    }

    fn fast_settings() -> InvocationSettings {
        InvocationSettings {
            concurrency: 2,
            attempts: 1,
            timeout: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_resolve_label_forms() {
        let p = bias_profile();
        assert_eq!(p.resolve_label("left"), Some("Left"));
        assert_eq!(p.resolve_label("LABEL_1"), Some("Center"));
        assert_eq!(p.resolve_label("LABEL_3"), None);
        assert_eq!(p.resolve_label("Centrist"), None);
    }

    #[test]
    fn test_to_probabilities_normalizes() {
        let p = bias_profile();
        let probs = p
            .to_probabilities(&[ls("Left", 0.3335), ls("Center", 0.333), ls("Right", 0.3330)])
            .unwrap();
        assert!((probs.total() - 1.0).abs() < 1e-9);
        assert_eq!(probs.label, "Left");
        assert_eq!(probs.confidence, probs.get("Left"));
    }

    #[test]
    fn test_to_probabilities_rejects_bad_shapes() {
        let p = bias_profile();
        let missing = p.to_probabilities(&[ls("Left", 0.5), ls("Right", 0.5)]);
        assert!(matches!(missing, Err(CallError::Malformed(_))));

        let logits = p.to_probabilities(&[ls("Left", 2.3), ls("Center", -1.0), ls("Right", 0.1)]);
        assert!(matches!(logits, Err(CallError::Malformed(_))));

        let unnormalized = p.to_probabilities(&[ls("Left", 0.5), ls("Center", 0.5), ls("Right", 0.5)]);
        assert!(matches!(unnormalized, Err(CallError::Malformed(_))));

        let dup = p.to_probabilities(&[ls("Left", 0.5), ls("left", 0.2), ls("Center", 0.3)]);
        assert!(matches!(dup, Err(CallError::Malformed(_))));
    }

    #[test]
    fn test_argmax_tie_uses_priority() {
        let p = bias_profile();
        let mut scores = BTreeMap::new();
        scores.insert("Left".to_string(), 0.4);
        scores.insert("Center".to_string(), 0.2);
        scores.insert("Right".to_string(), 0.4);
        assert_eq!(p.argmax(&scores).0, "Left");

        scores.insert("Center".to_string(), 0.4);
        scores.insert("Left".to_string(), 0.3);
        scores.insert("Right".to_string(), 0.3);
        assert_eq!(p.argmax(&scores).0, "Center");

        let custom = bias_profile()
            .with_priority(vec!["Right".into(), "Left".into(), "Center".into()])
            .unwrap();
        let mut tie = BTreeMap::new();
        tie.insert("Left".to_string(), 0.5);
        tie.insert("Center".to_string(), 0.0);
        tie.insert("Right".to_string(), 0.5);
        assert_eq!(custom.argmax(&tie).0, "Right");
    }

    #[test]
    fn test_priority_must_cover_labels() {
        assert!(bias_profile().with_priority(vec!["Left".into()]).is_err());
        assert!(bias_profile()
            .with_priority(vec!["Left".into(), "Left".into(), "Right".into()])
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let slot = slot(ScriptedClassifier::new(0));
        let chunks = vec![chunk(0, "fine text"), chunk(1, "FAIL here"), chunk(2, "more text")];
        let outcome = classify_chunks(&slot, &chunks, &fast_settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.predictions.len(), 2);
        assert_eq!(outcome.predictions[0].chunk_index, 0);
        assert_eq!(outcome.predictions[1].chunk_index, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].chunk_index, 1);
        assert_eq!(outcome.predictions[0].probabilities.label, "Left");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let slot = slot(ScriptedClassifier::new(0));
        let chunks = vec![chunk(0, "SLOW text"), chunk(1, "quick text")];
        let outcome = classify_chunks(&slot, &chunks, &fast_settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.predictions.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_error() {
        let slot = slot(ScriptedClassifier::new(1));
        let settings = InvocationSettings {
            attempts: 2,
            ..fast_settings()
        };
        let outcome = classify_chunks(&slot, &[chunk(0, "text")], &settings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.predictions.len(), 1);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_retry() {
        let slot = slot(ScriptedClassifier::new(1));
        let outcome =
            classify_chunks(&slot, &[chunk(0, "text")], &fast_settings(), &CancellationToken::new())
                .await
                .unwrap();
        assert!(outcome.predictions.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let slot = slot(ScriptedClassifier::new(0));
        let settings = InvocationSettings {
            timeout: Duration::from_secs(30),
            ..fast_settings()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let res = classify_chunks(&slot, &[chunk(0, "SLOW")], &settings, &cancel).await;
        assert!(matches!(
            res,
            Err(PipelineError::Cancelled(Stage::Classification(ClassifierKind::Bias)))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
