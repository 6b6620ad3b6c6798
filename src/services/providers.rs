// Model Provider Service
// OpenAI-compatible chat completions and hosted text-classification inference

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
pub const BIAS_DEFAULT_URL: &str =
    "https://api-inference.huggingface.co/models/premsa/political-bias-prediction-allsides-BERT";
pub const EMOTION_DEFAULT_URL: &str =
    "https://api-inference.huggingface.co/models/j-hartmann/emotion-english-distilroberta-base";

/// Transport-level ceiling; callers apply their own, tighter deadlines.
const HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("API key not configured")]
    MissingApiKey,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    pub latency_ms: i64,
}

/// Chat call parameters.
#[derive(Debug, Clone)]
pub struct ChatOptions<'a> {
    pub url: &'a str,
    pub model: &'a str,
    pub api_key: &'a str,
    pub max_tokens: u32,
    pub temperature: f64,
    pub json_output: bool,
}

/// One label/score pair as reported by a classification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
struct ClassificationRequest<'a> {
    inputs: &'a str,
    parameters: ClassificationParameters,
    options: ClassificationOptions,
}

/// Longest input, in model tokens, the hosted encoders accept.
pub const CLASSIFIER_MAX_LENGTH: usize = 512;

#[derive(Debug, Serialize)]
struct ClassificationParameters {
    top_k: usize,
    function_to_apply: &'static str,
    truncation: bool,
    max_length: usize,
}

impl<'a> ClassificationRequest<'a> {
    fn new(text: &'a str, top_k: usize) -> Self {
        Self {
            inputs: text,
            parameters: ClassificationParameters {
                top_k,
                function_to_apply: "softmax",
                // Oversized single-sentence chunks are cut to the model window
                // instead of failing.
                truncation: true,
                max_length: CLASSIFIER_MAX_LENGTH,
            },
            options: ClassificationOptions {
                wait_for_model: true,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassificationOptions {
    wait_for_model: bool,
}

/// Endpoints answer either `[[{label, score}]]` (batched) or `[{label, score}]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl ClassificationResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            ClassificationResponse::Nested(outer) => outer.into_iter().next().unwrap_or_default(),
            ClassificationResponse::Flat(scores) => scores,
        }
    }
}

/// Shared HTTP client; cheap to clone behind an `Arc`, safe for concurrent use.
pub struct ProviderClient {
    client: Client,
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_proxy(proxy_url: &str) -> Result<Self, ProviderError> {
        let proxy = reqwest::Proxy::all(proxy_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .proxy(proxy)
            .build()?;
        Ok(Self { client })
    }

    pub async fn call_chat(
        &self,
        options: &ChatOptions<'_>,
        system: &str,
        user: &str,
    ) -> Result<ChatResult, ProviderError> {
        if options.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let request = ChatRequest {
            model: options.model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: options.json_output.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        };

        let start = Instant::now();

        let response = self
            .client
            .post(options.url)
            .header("Authorization", format!("Bearer {}", options.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let content = data
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or(ProviderError::MissingContent)?;

        Ok(ChatResult {
            content,
            latency_ms,
        })
    }

    /// Score `text` against every label of a hosted sequence classifier.
    pub async fn call_text_classification(
        &self,
        url: &str,
        api_token: Option<&str>,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<LabelScore>, ProviderError> {
        let request = ClassificationRequest::new(text, top_k);

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(token) = api_token.filter(|t| !t.trim().is_empty()) {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;
        parse_classification_body(&body)
    }
}

fn parse_classification_body(body: &str) -> Result<Vec<LabelScore>, ProviderError> {
    let parsed: ClassificationResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::JsonError(e.to_string()))?;
    let scores = parsed.into_scores();
    if scores.is_empty() {
        return Err(ProviderError::MissingContent);
    }
    Ok(scores)
}

/// Get API key from environment or config file
pub fn get_api_key(provider: &str) -> Option<String> {
    let env_keys: &[&str] = match super::config_store::canonical_provider(provider) {
        Some("openai") => &["ECHOLENS_OPENAI_API_KEY", "OPENAI_API_KEY"],
        Some("huggingface") => &["ECHOLENS_HF_API_TOKEN", "HF_API_TOKEN"],
        _ => &[],
    };

    for key in env_keys {
        if let Ok(val) = env::var(key) {
            let v = val.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }

    if let Some(config_dir) = super::ConfigStore::default_config_dir() {
        let store = super::ConfigStore::new(config_dir);
        if let Ok(Some(key)) = store.get_api_key(provider) {
            return Some(key);
        }
    }

    None
}
