// Claim / Debate Orchestrator
// Two sequential generative calls: extract the central claim, then argue both
// sides of that claim. Stage 2 only ever sees a claim produced by stage 1.

use crate::error::{CallError, PipelineError, Stage};
use crate::models::{ArgumentSet, Claim};
use crate::services::config_store::DebateConfig;
use crate::services::providers::{ChatOptions, ChatResult, ProviderClient, ProviderError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const CLAIM_SYSTEM_PROMPT: &str = r#"You are a debate assistant. Read the user's text (an article or an opinion) and identify its core claim: the single central assertion someone could reasonably argue for or against.

Reply with one short sentence in this format and nothing else:
Claim: <core claim>"#;

const ARGUMENT_SYSTEM_PROMPT: &str = r#"You are a debate assistant. You are given one claim. Write clear, concise points both for and against that exact claim; both sides must argue the same proposition.

Return JSON only, in this shape:
{"for": ["point 1", "point 2"], "against": ["point 1", "point 2"]}

Each point is one short sentence. A side may be an empty list if there is genuinely no reasonable argument for it."#;

/// `generateText` capability of a generative model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        json_output: bool,
    ) -> Result<ChatResult, ProviderError>;
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiChatGenerator {
    client: Arc<ProviderClient>,
    url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiChatGenerator {
    pub fn new(client: Arc<ProviderClient>, config: &DebateConfig, api_key: String) -> Self {
        Self {
            client,
            url: config.resolve_endpoint(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChatGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        json_output: bool,
    ) -> Result<ChatResult, ProviderError> {
        let options = ChatOptions {
            url: &self.url,
            model: &self.model,
            api_key: &self.api_key,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_output,
        };
        self.client.call_chat(&options, system, user).await
    }
}

#[derive(Debug, Clone)]
pub struct DebateSettings {
    /// Deadline for each of the two calls.
    pub timeout: Duration,
    pub max_points_per_side: usize,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self::from(&DebateConfig::default())
    }
}

impl From<&DebateConfig> for DebateSettings {
    fn from(config: &DebateConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_points_per_side: config.max_points_per_side,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArgumentPayload {
    #[serde(rename = "for", alias = "forPoints", alias = "for_points")]
    for_points: Vec<String>,
    #[serde(rename = "against", alias = "againstPoints", alias = "against_points")]
    against_points: Vec<String>,
}

/// Outermost `{...}` of a response, tolerating prose or code fences around it.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Claim text from a stage-1 response: the `Claim:` line when present,
/// otherwise the first non-empty line, with quotes stripped.
pub fn parse_claim(content: &str) -> Result<Claim, CallError> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let tagged = lines
        .iter()
        .enumerate()
        .find_map(|(idx, line)| claim_tag_rest(line).map(|rest| (idx, rest)));
    let raw = match tagged {
        // Tag on its own line: the claim follows on the next one.
        Some((idx, rest)) if clean_claim(rest).is_empty() => {
            lines.get(idx + 1).copied().unwrap_or("")
        }
        Some((_, rest)) => rest,
        None => lines.first().copied().unwrap_or(""),
    };

    Claim::new(clean_claim(raw)).ok_or(CallError::Empty)
}

/// Text after a `Claim:` tag, tolerating markdown emphasis such as `**Claim:**`.
fn claim_tag_rest(line: &str) -> Option<&str> {
    let line = line.trim_start_matches(['*', '_', '#', ' ']);
    let head = line.get(..5)?;
    if !head.eq_ignore_ascii_case("claim") {
        return None;
    }
    let rest = line[5..].trim_start_matches(['*', '_']).strip_prefix(':')?;
    Some(rest.trim_start_matches(['*', '_']))
}

fn clean_claim(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’' | '*' | '`'))
        .trim()
}

fn strip_bullet(line: &str) -> Option<&str> {
    ["- ", "* ", "• "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
}

/// `Arguments For:` / `Arguments Against:` bullet sections. `None` when
/// neither header is present.
fn parse_bullet_sections(content: &str) -> Option<(Vec<String>, Vec<String>)> {
    #[derive(PartialEq)]
    enum Section {
        Outside,
        For,
        Against,
    }

    let mut section = Section::Outside;
    let mut seen_header = false;
    let mut for_points = Vec::new();
    let mut against_points = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("arguments for") {
            section = Section::For;
            seen_header = true;
            continue;
        }
        if lower.starts_with("arguments against") {
            section = Section::Against;
            seen_header = true;
            continue;
        }
        match strip_bullet(trimmed) {
            Some(point) => match section {
                Section::For => for_points.push(point.to_string()),
                Section::Against => against_points.push(point.to_string()),
                Section::Outside => {}
            },
            None if !trimmed.is_empty() => section = Section::Outside,
            None => {}
        }
    }

    seen_header.then_some((for_points, against_points))
}

fn clean_points(points: Vec<String>, max_points: usize) -> Vec<String> {
    points
        .into_iter()
        .map(|p| {
            let p = p.trim();
            strip_bullet(p).unwrap_or(p).trim().to_string()
        })
        .filter(|p| !p.is_empty())
        .take(max_points)
        .collect()
}

/// For/against lists from a stage-2 response. A well-formed empty side is
/// valid; a response that is not a list of strings on both sides is not.
pub fn parse_arguments(
    content: &str,
    max_points: usize,
) -> Result<(Vec<String>, Vec<String>), CallError> {
    let content = content.trim();
    let (for_points, against_points) = match extract_json(content) {
        Some(json) => {
            let payload: ArgumentPayload = serde_json::from_str(json)
                .map_err(|e| CallError::Malformed(format!("argument JSON: {}", e)))?;
            (payload.for_points, payload.against_points)
        }
        None => parse_bullet_sections(content).ok_or_else(|| {
            CallError::Malformed("no argument JSON object or For/Against sections".to_string())
        })?,
    };
    Ok((
        clean_points(for_points, max_points),
        clean_points(against_points, max_points),
    ))
}

/// The two generative calls of a debate request.
#[derive(Debug, Clone, Copy)]
enum DebateStep {
    Claim,
    Arguments,
}

impl DebateStep {
    fn stage(self) -> Stage {
        match self {
            DebateStep::Claim => Stage::ClaimExtraction,
            DebateStep::Arguments => Stage::ArgumentGeneration,
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            DebateStep::Claim => CLAIM_SYSTEM_PROMPT,
            DebateStep::Arguments => ARGUMENT_SYSTEM_PROMPT,
        }
    }

    fn json_output(self) -> bool {
        matches!(self, DebateStep::Arguments)
    }

    fn failure(self, err: CallError) -> PipelineError {
        match self {
            DebateStep::Claim => PipelineError::ClaimExtraction(err),
            DebateStep::Arguments => PipelineError::ArgumentGeneration(err),
        }
    }
}

/// Sequential claim -> arguments runner.
pub struct DebateOrchestrator {
    generator: Arc<dyn TextGenerator>,
    settings: DebateSettings,
}

impl DebateOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: DebateSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &DebateSettings {
        &self.settings
    }

    /// One generative call with a deadline, abandoned as soon as `cancel` fires.
    async fn call_step(
        &self,
        step: DebateStep,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let stage = step.stage();
        let timeout = self.settings.timeout;
        let call = tokio::time::timeout(
            timeout,
            self.generator
                .generate(step.system_prompt(), user, step.json_output()),
        );
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("[DEBATE] {} cancelled", stage);
                return Err(PipelineError::Cancelled(stage));
            }
            res = call => res,
        };

        match res {
            Ok(Ok(chat)) => {
                info!("[DEBATE] {} ok latency_ms={}", stage, chat.latency_ms);
                let content = chat.content.trim();
                if content.is_empty() {
                    return Err(step.failure(CallError::Empty));
                }
                Ok(content.to_string())
            }
            Ok(Err(e)) => {
                warn!("[DEBATE] {} call failed: {}", stage, e);
                Err(step.failure(CallError::Provider(e)))
            }
            Err(_) => {
                warn!("[DEBATE] {} timed out after {:?}", stage, timeout);
                Err(step.failure(CallError::Timeout(timeout)))
            }
        }
    }

    pub async fn extract_claim(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Claim, PipelineError> {
        let user = format!("text:\n{}\n\nextract the core claim", text);
        let content = self.call_step(DebateStep::Claim, &user, cancel).await?;
        parse_claim(&content).map_err(PipelineError::ClaimExtraction)
    }

    pub async fn generate_arguments(
        &self,
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), PipelineError> {
        let max = self.settings.max_points_per_side;
        let user = format!(
            "claim: {}\n\nwrite at most {} points for and at most {} points against this claim",
            claim, max, max
        );
        let content = self.call_step(DebateStep::Arguments, &user, cancel).await?;
        parse_arguments(&content, max).map_err(PipelineError::ArgumentGeneration)
    }

    /// Claim extraction, then argument generation grounded on that claim.
    pub async fn run(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ArgumentSet, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let claim = self.extract_claim(text, cancel).await?;
        info!("[DEBATE] request={} claim=\"{}\"", request_id, claim);

        let (for_points, against_points) = self.generate_arguments(&claim, cancel).await?;
        info!(
            "[DEBATE] request={} for={} against={} elapsed_ms={}",
            request_id,
            for_points.len(),
            against_points.len(),
            started.elapsed().as_millis()
        );

        Ok(ArgumentSet {
            request_id,
            created_at: Utc::now(),
            claim,
            for_points,
            against_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Status(u16),
        Hang,
    }

    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Reply>>,
        prompts: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _system: &str,
            user: &str,
            json_output: bool,
        ) -> Result<ChatResult, ProviderError> {
            self.prompts.lock().unwrap().push((user.to_string(), json_output));
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Text(t)) => Ok(ChatResult {
                    content: t.to_string(),
                    latency_ms: 1,
                }),
                Some(Reply::Status(status)) => Err(ProviderError::ApiError {
                    status,
                    message: "upstream".into(),
                }),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ProviderError::MissingContent)
                }
                None => Err(ProviderError::MissingContent),
            }
        }
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>) -> DebateOrchestrator {
        DebateOrchestrator::new(
            generator,
            DebateSettings {
                timeout: Duration::from_millis(200),
                max_points_per_side: 3,
            },
        )
    }

    const TEXT: &str = "The city should build more bike lanes because traffic is terrible.";

    #[test]
    fn test_debate_step_wiring() {
        assert_eq!(DebateStep::Claim.stage(), Stage::ClaimExtraction);
        assert!(!DebateStep::Claim.json_output());
        assert_eq!(DebateStep::Claim.system_prompt(), CLAIM_SYSTEM_PROMPT);
        assert!(matches!(
            DebateStep::Claim.failure(CallError::Empty),
            PipelineError::ClaimExtraction(CallError::Empty)
        ));

        assert_eq!(DebateStep::Arguments.stage(), Stage::ArgumentGeneration);
        assert!(DebateStep::Arguments.json_output());
        assert_eq!(DebateStep::Arguments.system_prompt(), ARGUMENT_SYSTEM_PROMPT);
        let err = DebateStep::Arguments.failure(CallError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.stage(), Some(Stage::ArgumentGeneration));
    }

    #[test]
    fn test_parse_claim_variants() {
        assert_eq!(
            parse_claim("Claim: \"Bike lanes reduce traffic.\"").unwrap().as_str(),
            "Bike lanes reduce traffic."
        );
        assert_eq!(
            parse_claim("Here you go.\nclaim:   Taxes should rise.\n").unwrap().as_str(),
            "Taxes should rise."
        );
        assert_eq!(
            parse_claim("  Remote work is better.\nMore text").unwrap().as_str(),
            "Remote work is better."
        );
        assert_eq!(
            parse_claim("Claim:\nCities should build more bike lanes.").unwrap().as_str(),
            "Cities should build more bike lanes."
        );
        assert_eq!(
            parse_claim("**Claim:** Cities should build more bike lanes.").unwrap().as_str(),
            "Cities should build more bike lanes."
        );
        assert_eq!(
            parse_claim("**Claim**:\n\n  \"Rent control helps tenants.\"").unwrap().as_str(),
            "Rent control helps tenants."
        );
        assert_eq!(
            parse_claim("Claims vary.\nNothing tagged here.").unwrap().as_str(),
            "Claims vary."
        );
        assert!(matches!(parse_claim("Claim: \"\""), Err(CallError::Empty)));
        assert!(matches!(parse_claim("   \n "), Err(CallError::Empty)));
    }

    #[test]
    fn test_parse_arguments_json_in_fence() {
        let content = "```json\n{\"for\": [\"a\", \" \", \"b\"], \"against\": []}\n```";
        let (for_points, against_points) = parse_arguments(content, 3).unwrap();
        assert_eq!(for_points, vec!["a".to_string(), "b".to_string()]);
        assert!(against_points.is_empty());
    }

    #[test]
    fn test_parse_arguments_truncates_each_side() {
        let content = r#"{"forPoints": ["1","2","3","4"], "againstPoints": ["x"]}"#;
        let (for_points, against_points) = parse_arguments(content, 3).unwrap();
        assert_eq!(for_points.len(), 3);
        assert_eq!(against_points, vec!["x".to_string()]);
    }

    #[test]
    fn test_parse_arguments_rejects_wrong_shape() {
        assert!(matches!(
            parse_arguments(r#"{"for": "just one string", "against": []}"#, 3),
            Err(CallError::Malformed(_))
        ));
        assert!(matches!(
            parse_arguments(r#"{"for": ["a"]}"#, 3),
            Err(CallError::Malformed(_))
        ));
        assert!(matches!(
            parse_arguments("I cannot help with that.", 3),
            Err(CallError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_arguments_bullet_format() {
        let content = "Claim: x\n\nArguments For:\n- cheaper\n- faster\n\nArguments Against:\n- riskier\n";
        let (for_points, against_points) = parse_arguments(content, 3).unwrap();
        assert_eq!(for_points, vec!["cheaper".to_string(), "faster".to_string()]);
        assert_eq!(against_points, vec!["riskier".to_string()]);
    }

    #[tokio::test]
    async fn test_run_is_claim_grounded() {
        let generator = ScriptedGenerator::new(vec![
            Reply::Text("Claim: The city should build more bike lanes."),
            Reply::Text(r#"{"for": ["less congestion", "cleaner air"], "against": []}"#),
        ]);
        let set = orchestrator(generator.clone())
            .run(TEXT, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(set.claim.as_str(), "The city should build more bike lanes.");
        assert_eq!(set.for_points.len(), 2);
        assert!(set.against_points.is_empty());

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.contains(TEXT));
        assert!(!calls[0].1);
        assert!(calls[1].0.contains("The city should build more bike lanes."));
        assert!(!calls[1].0.contains("traffic is terrible"));
        assert!(calls[1].1);
    }

    #[tokio::test]
    async fn test_claim_failure_skips_arguments() {
        let generator = ScriptedGenerator::new(vec![
            Reply::Status(500),
            Reply::Text(r#"{"for": ["x"], "against": ["y"]}"#),
        ]);
        let err = orchestrator(generator.clone())
            .run(TEXT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClaimExtraction(CallError::Provider(_))));
        assert!(err.is_retryable());
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_claim_is_extraction_error() {
        let generator = ScriptedGenerator::new(vec![Reply::Text("   ")]);
        let err = orchestrator(generator.clone())
            .run(TEXT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClaimExtraction(CallError::Empty)));
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let generator = ScriptedGenerator::new(vec![
            Reply::Text("Claim: x is good"),
            Reply::Text("Sure! Both sides have merit."),
        ]);
        let err = orchestrator(generator)
            .run(TEXT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArgumentGeneration(CallError::Malformed(_))));
        assert_eq!(err.stage(), Some(Stage::ArgumentGeneration));
    }

    #[tokio::test]
    async fn test_claim_timeout() {
        let generator = ScriptedGenerator::new(vec![Reply::Hang]);
        let err = orchestrator(generator)
            .run(TEXT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClaimExtraction(CallError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_start_issues_no_call() {
        let generator = ScriptedGenerator::new(vec![Reply::Text("Claim: x")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator(generator.clone()).run(TEXT, &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(Stage::ClaimExtraction)));
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_arguments() {
        let generator = ScriptedGenerator::new(vec![Reply::Text("Claim: x is good"), Reply::Hang]);
        let orchestrator = DebateOrchestrator::new(
            generator.clone(),
            DebateSettings {
                timeout: Duration::from_secs(10),
                max_points_per_side: 3,
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = orchestrator.run(TEXT, &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(Stage::ArgumentGeneration)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(generator.calls().len(), 2);
    }
}
