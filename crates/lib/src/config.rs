//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.config/tandem/config.json`) and environment.
//! The only value the UI reads back is the OpenAI API key; the rest tunes the Ollama path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// API key for the cloud provider. Overridden by OPENAI_API_KEY env when set.
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Local Ollama server settings.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Delay between revealed characters of a simulated response (default 20).
    #[serde(default = "default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,

    /// Text sent ahead of the conversation (system message in chat mode, prompt prefix in
    /// generate mode). Defaults to the math formatting hint; `null` or "" sends none.
    #[serde(default = "default_preamble")]
    pub preamble: Option<String>,
}

/// Which Ollama endpoint carries a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OllamaEndpoint {
    /// POST /api/chat with the full history; fragments are applied as they arrive.
    #[default]
    Chat,
    /// POST /api/generate with the latest prompt; fragments are collected, then applied.
    Generate,
}

/// Ollama base URL and request options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    /// Server root (default http://127.0.0.1:11434).
    pub base_url: Option<String>,

    #[serde(default)]
    pub endpoint: OllamaEndpoint,

    /// When true, pull the chat's model via /api/pull before sending if it is not installed. Default: false.
    #[serde(default)]
    pub pull_missing_models: bool,
}

fn default_reveal_interval_ms() -> u64 {
    20
}

/// Asks local models to wrap math in `$$` delimiters.
pub const DEFAULT_PREAMBLE: &str = "Wrap all of your math equations in $$.\n\n  e.g. $1 + 1$";

fn default_preamble() -> Option<String> {
    Some(DEFAULT_PREAMBLE.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            ollama: OllamaConfig::default(),
            reveal_interval_ms: default_reveal_interval_ms(),
            preamble: default_preamble(),
        }
    }
}

/// Resolve the OpenAI API key: env OPENAI_API_KEY overrides config.
pub fn resolve_openai_api_key(config: &Config) -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .openai_api_key
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TANDEM_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::config_dir()
            .map(|d| d.join("tandem").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (default: TANDEM_CONFIG_PATH or the platform config dir).
/// A missing file is created with defaults. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, writing defaults: {}", path.display());
        let config = Config::default();
        save_config(&config, &path)?;
        config
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write config as pretty JSON, creating the parent directory if needed.
pub fn save_config(config: &Config, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config dir {}", parent.display()))?;
    }
    let s = serde_json::to_string_pretty(config)?;
    std::fs::write(path, s).with_context(|| format!("writing config to {}", path.display()))?;
    Ok(())
}
