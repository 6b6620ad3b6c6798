// Configuration Storage Service
// Handles config file read/write, version backup and stored API keys

use crate::models::ClassifierKind;
use crate::services::analysis::chunk_builder::DEFAULT_TOKEN_BUDGET;
use crate::services::providers::{
    BIAS_DEFAULT_URL, EMOTION_DEFAULT_URL, OPENAI_DEFAULT_MODEL, OPENAI_DEFAULT_URL,
};
use crate::services::sentence_segmenter::DEFAULT_MIN_CHARS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    /// Proxy URL applied to every provider call.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub debate: DebateConfig,
    /// JSON file mapping news domains to bias labels.
    #[serde(default)]
    pub source_bias_path: Option<PathBuf>,
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    /// Attempts per chunk classification call; 1 disables retry.
    #[serde(default = "default_chunk_attempts")]
    pub chunk_attempts: usize,
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,
    #[serde(default)]
    pub bias: ClassifierConfig,
    #[serde(default)]
    pub emotion: ClassifierConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_MIN_CHARS,
            chunk_concurrency: default_chunk_concurrency(),
            chunk_attempts: default_chunk_attempts(),
            classify_timeout_secs: default_classify_timeout(),
            bias: ClassifierConfig::default(),
            emotion: ClassifierConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn classifier(&self, kind: ClassifierKind) -> &ClassifierConfig {
        match kind {
            ClassifierKind::Bias => &self.bias,
            ClassifierKind::Emotion => &self.emotion,
        }
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// `tokenizer.json` of the classifier (used with the `hf-tokenizer` feature).
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    /// Tie-break order; empty means the built-in order for the kind.
    #[serde(default)]
    pub label_priority: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_budget: DEFAULT_TOKEN_BUDGET,
            tokenizer_path: None,
            label_priority: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    /// Config value, then `ECHOLENS_<KIND>_URL`, then the hosted default.
    pub fn resolve_endpoint(&self, kind: ClassifierKind) -> String {
        if let Some(url) = self.endpoint.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        let env_key = format!("ECHOLENS_{}_URL", kind.as_str().to_ascii_uppercase());
        if let Ok(url) = std::env::var(env_key) {
            if !url.trim().is_empty() {
                return url;
            }
        }
        match kind {
            ClassifierKind::Bias => BIAS_DEFAULT_URL.to_string(),
            ClassifierKind::Emotion => EMOTION_DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generate_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_points")]
    pub max_points_per_side: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generate_timeout(),
            max_points_per_side: default_max_points(),
        }
    }
}

impl DebateConfig {
    pub fn resolve_endpoint(&self) -> String {
        if let Some(url) = self.endpoint.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        std::env::var("ECHOLENS_OPENAI_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_min_chars() -> usize { DEFAULT_MIN_CHARS }
fn default_chunk_concurrency() -> usize { 4 }
fn default_chunk_attempts() -> usize { 1 }
fn default_classify_timeout() -> u64 { 30 }
fn default_token_budget() -> usize { DEFAULT_TOKEN_BUDGET }
fn default_model() -> String { OPENAI_DEFAULT_MODEL.to_string() }
fn default_temperature() -> f64 { 0.7 }
fn default_max_tokens() -> u32 { 600 }
fn default_generate_timeout() -> u64 { 60 }
fn default_max_points() -> usize { 3 }

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("echolens"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), String> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| format!("Failed to create config dir: {}", e))
    }

    /// Load configuration from file
    pub fn load(&self) -> Result<AppConfig, String> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), String> {
        self.ensure_dir()?;

        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(&self.config_file, content).map_err(|e| format!("Failed to write config: {}", e))
    }

    fn create_backup(&self) -> Result<(), String> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir)
            .map_err(|e| format!("Failed to create backup dir: {}", e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file)
            .map_err(|e| format!("Failed to create backup: {}", e))?;

        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), String> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(|e| format!("Failed to read backup dir: {}", e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // Oldest first; names embed the timestamp.
        entries.sort_by_key(|e| e.file_name());

        for entry in entries.iter().take(entries.len() - keep) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }

    /// Get provider API key from config file
    pub fn get_api_key(&self, provider: &str) -> Result<Option<String>, String> {
        let Some(name) = canonical_provider(provider) else {
            return Ok(None);
        };
        let config = self.load()?;
        Ok(config
            .api_keys
            .get(name)
            .filter(|k| !k.trim().is_empty())
            .cloned())
    }

    /// Store provider API key in config file
    pub fn set_api_key(&self, provider: &str, key: &str) -> Result<(), String> {
        let name = canonical_provider(provider).ok_or_else(|| {
            format!("Unknown provider '{}' (expected openai or huggingface)", provider)
        })?;
        let mut config = self.load()?;
        config.api_keys.insert(name.to_string(), key.trim().to_string());
        self.save(&config)
    }

    /// Delete provider API key from config file
    pub fn delete_api_key(&self, provider: &str) -> Result<(), String> {
        let mut config = self.load()?;
        config.api_keys.remove(provider);
        if let Some(name) = canonical_provider(provider) {
            config.api_keys.remove(name);
        }
        self.save(&config)
    }
}

/// Name under which a provider's key is stored; `hf` is an alias.
pub fn canonical_provider(provider: &str) -> Option<&'static str> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => Some("openai"),
        "huggingface" | "hf" => Some("huggingface"),
        _ => None,
    }
}
