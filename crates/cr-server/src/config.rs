use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use cr_agents::{ExtractionMode, SummaryMode};
use cr_core::RetryPolicy;
use cr_providers::BackendConfig;
use cr_tools::SearchConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub research: ResearchConfig,
    pub providers: ProvidersConfig,
    pub search: SearchConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on one research run. 0 disables the deadline.
    pub run_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            run_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Model id used when a run does not name one ("openai" or "anthropic")
    pub default_model: String,
    pub extraction_mode: ExtractionMode,
    pub summary_mode: SummaryMode,
    /// Industry vocabulary, one name per line (supports ~)
    pub industries_path: Option<String>,
    pub checkpoint_capacity: usize,
    /// Search rounds allowed to the race predictor
    pub race_max_rounds: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_model: "openai".to_string(),
            extraction_mode: ExtractionMode::default(),
            summary_mode: SummaryMode::default(),
            industries_path: None,
            checkpoint_capacity: 1024,
            race_max_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: BackendConfig,
    pub anthropic: BackendConfig,
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Defaults, then the TOML file, then `CR_*` environment variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::config_path(),
        };

        let mut config = Self::figment(file.as_deref())
            .merge(Env::prefixed("CR_").split("__"))
            .extract::<Config>()
            .context("Invalid configuration")?;
        config.apply_key_fallbacks(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Fill API keys left unset from the conventional variables.
    pub fn apply_key_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut Option<String>, name: &str| {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = lookup(name).filter(|v| !v.is_empty());
            }
        };
        fill(&mut self.providers.openai.api_key, "OPENAI_API_KEY");
        fill(&mut self.providers.anthropic.api_key, "ANTHROPIC_API_KEY");
        fill(&mut self.search.api_key, "TAVILY_API_KEY");
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("company-research").join("config.toml"))
    }

    pub fn industries_path(&self) -> Option<PathBuf> {
        self.research.industries_path.as_deref().map(expand_path)
    }
}
