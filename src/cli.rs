// Command Line Surface
// `analyze`, `debate` and `config` subcommands over AnalysisService

use crate::models::ClassifierKind;
use crate::services::analysis::AnalysisService;
use crate::services::config_store::{AppConfig, ConfigStore};
use crate::services::source_bias::SourceBiasTable;
use crate::services::text_processor::normalize_punctuation;
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "echolens", version, about = "Political bias and emotion analysis with balanced debate generation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify text for political bias and emotional tone
    Analyze {
        /// Read text from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Article URL; its domain is looked up in the source bias table
        #[arg(long)]
        source: Option<String>,
        /// Source bias table (JSON object of domain -> label)
        #[arg(long)]
        bias_table: Option<PathBuf>,
        /// Classifier kinds to run
        #[arg(long, value_delimiter = ',', default_value = "bias,emotion")]
        kinds: Vec<ClassifierKind>,
    },
    /// Extract the central claim and argue both sides of it
    Debate {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Manage stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Store an API key (`openai` or `huggingface`)
    SetKey { provider: String, key: String },
    /// Remove a stored API key
    DeleteKey { provider: String },
    /// Print the effective configuration with keys masked
    Show,
}

fn config_store() -> anyhow::Result<ConfigStore> {
    let dir = ConfigStore::default_config_dir()
        .ok_or_else(|| anyhow!("no configuration directory on this platform"))?;
    Ok(ConfigStore::new(dir))
}

fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read file failed: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin failed")?;
            buf
        }
    };
    Ok(normalize_punctuation(&raw))
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{}", visible)
}

/// Cancels the token on Ctrl-C so outstanding model calls are abandoned.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            trigger.cancel();
        }
    });
    cancel
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let store = config_store()?;
    let config: AppConfig = store.load().map_err(|e| anyhow!(e))?;

    match cli.command {
        Command::Analyze {
            file,
            source,
            bias_table,
            kinds,
        } => {
            let text = read_input(file.as_deref())?;
            let service = AnalysisService::from_config(&config)?;
            let cancel = cancel_on_ctrl_c();
            let mut response = service.analyze_kinds(&text, &kinds, &cancel).await?;

            if let Some(url) = source {
                match bias_table.or_else(|| config.source_bias_path.clone()) {
                    Some(path) => {
                        let table = SourceBiasTable::load(&path).map_err(|e| anyhow!(e))?;
                        response.source_bias = table.lookup_url(&url);
                        if response.source_bias.is_none() {
                            info!("No source bias rating for {}", url);
                        }
                    }
                    None => warn!("--source given but no source bias table configured"),
                }
            }

            print_json(&response)
        }
        Command::Debate { file } => {
            let text = read_input(file.as_deref())?;
            let service = AnalysisService::from_config(&config)?;
            let cancel = cancel_on_ctrl_c();
            let arguments = service.debate_with_cancel(&text, &cancel).await?;
            print_json(&arguments)
        }
        Command::Config { action } => match action {
            ConfigAction::SetKey { provider, key } => {
                store.set_api_key(&provider, &key).map_err(|e| anyhow!(e))?;
                eprintln!("Stored {} key in {}", provider, store.config_file().display());
                Ok(())
            }
            ConfigAction::DeleteKey { provider } => {
                store.delete_api_key(&provider).map_err(|e| anyhow!(e))?;
                eprintln!("Removed {} key", provider);
                Ok(())
            }
            ConfigAction::Show => {
                let mut shown = config;
                for key in shown.api_keys.values_mut() {
                    *key = mask_key(key);
                }
                print_json(&shown)
            }
        },
    }
}
