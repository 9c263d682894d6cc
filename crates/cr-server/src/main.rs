use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cr_agents::{GraphOptions, Industries, MemoryCheckpointer, RacePredictor, ResearchGraph};
use cr_core::{ModelSelector, Tool};
use cr_providers::ProviderSelector;
use cr_tools::create_search_tool;

mod config;
mod http;

use config::Config;
use http::AppState;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including request and response bodies
    Trace,
    /// Node transitions, search queries, token usage
    Debug,
    /// Run start and finish, server lifecycle
    Info,
    /// Only warnings and errors
    Warn,
    /// Only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "cr")]
#[command(author, version, about = "Company research agent", long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/company-research/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Research one question and print the answer
    Ask {
        question: String,

        /// Model id ("openai" or "anthropic")
        #[arg(short, long)]
        model: Option<String>,
    },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    let filter = EnvFilter::new(log_level.as_filter());

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn build_state(config: &Config) -> Result<AppState> {
    let selector: Arc<dyn ModelSelector> = Arc::new(
        ProviderSelector::from_backends(
            &config.providers.openai,
            &config.providers.anthropic,
            &config.retry,
        )
        .with_env_override(std::env::var("MODEL").ok()),
    );

    let search: Arc<dyn Tool> = create_search_tool(config.search.clone(), config.retry.clone());
    if config.search.api_key.is_none() {
        warn!("No search API key configured; research runs will fail at the search step");
    }

    let industries = match config.industries_path() {
        Some(path) => Industries::load(&path)
            .with_context(|| format!("Failed to load industries from {}", path.display()))?,
        None => Industries::default(),
    };
    info!(industries = industries.names().len(), "Industry vocabulary loaded");

    let deadline = match config.server.run_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let graph = ResearchGraph::new(
        selector.clone(),
        search.clone(),
        GraphOptions {
            extraction_mode: config.research.extraction_mode,
            summary_mode: config.research.summary_mode,
            industries,
            deadline,
        },
    )
    .with_checkpointer(Arc::new(MemoryCheckpointer::new(
        config.research.checkpoint_capacity,
    )));

    let race = RacePredictor::new(search).with_max_rounds(config.research.race_max_rounds);

    Ok(AppState {
        graph: Arc::new(graph),
        race: Arc::new(race),
        selector,
        default_model: config.research.default_model.clone(),
        deadline,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let state = build_state(&config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            http::serve(&host, port, state)
                .await
                .with_context(|| format!("Server on {host}:{port} failed"))?;
        }
        Commands::Ask { question, model } => {
            let model = model.unwrap_or(state.default_model);
            let (run_id, answer) = state.graph.ask(&question, &model).await?;
            info!(run_id = %run_id, "Answer ready");
            println!("{}", answer.render());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["cr", "-d", "serve", "--port", "9000"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Serve { host: None, port: Some(9000) }));

        let cli = Cli::parse_from(["cr", "ask", "Acme Corp headquarters", "--model", "anthropic"]);
        match cli.command {
            Commands::Ask { question, model } => {
                assert_eq!(question, "Acme Corp headquarters");
                assert_eq!(model.as_deref(), Some("anthropic"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_build_state_without_keys() {
        let config = Config::default();
        let state = build_state(&config).unwrap();
        assert_eq!(state.default_model, "openai");
        assert_eq!(state.deadline, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_build_state_reports_missing_industries() {
        let mut config = Config::default();
        config.research.industries_path = Some("/nonexistent/industry.md".to_string());
        assert!(build_state(&config).is_err());
    }
}
