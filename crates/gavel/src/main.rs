mod api;
mod ask;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use gavel_core::{ConversationMode, Orchestrator};
use gavel_criteria::{CriteriaConfig, CriteriaPatch, CriteriaRegistry};
use gavel_logging::{init_tracing, LogFormat, Logger};
use gavel_provider::HttpProvider;

use config::ProjectConfig;

#[derive(Parser, Debug)]
#[command(
    name = "gavel",
    about = "Generator-judge feedback harness for conversational agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Working directory containing gavel.toml and criteria.toml
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Also append structured JSON logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Tracing filter (e.g. "info", "gavel=debug")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single prompt through the pipeline and print the outcome
    Ask {
        /// The prompt
        prompt: String,

        /// Conversation mode
        #[arg(short, long, value_enum, default_value = "feedback")]
        mode: ModeChoice,

        /// Override the configured refinement budget
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Print the final outcome as JSON
        #[arg(long)]
        json_output: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeChoice {
    Simple,
    Feedback,
    InputCritique,
}

impl From<ModeChoice> for ConversationMode {
    fn from(choice: ModeChoice) -> Self {
        match choice {
            ModeChoice::Simple => ConversationMode::Simple,
            ModeChoice::Feedback => ConversationMode::Feedback,
            ModeChoice::InputCritique => ConversationMode::InputCritique,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = cli
        .working_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().expect("Failed to get current directory"));

    let log_format: LogFormat = cli.log_format.into();
    init_tracing(&cli.log_level, log_format);

    let logger = match &cli.log_file {
        Some(path) => Logger::with_file(log_format, path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?,
        None => Logger::new(log_format),
    };

    let project = ProjectConfig::load(&working_dir)?.unwrap_or_default();
    let registry = Arc::new(load_registry(&working_dir, &project)?);

    let generator = HttpProvider::generator(&project.generator_provider())
        .map_err(|e| anyhow::anyhow!("Failed to build generator client: {e}"))?;
    let scorer = HttpProvider::scorer(&project.judge_provider())
        .map_err(|e| anyhow::anyhow!("Failed to build judge client: {e}"))?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(generator),
        Arc::new(scorer),
        registry.clone(),
        Arc::new(logger),
    ));

    match cli.command {
        Command::Serve { host, port } => serve(orchestrator, registry, &project, host, port).await,
        Command::Ask {
            prompt,
            mode,
            max_iterations,
            json_output,
        } => {
            if let Some(max) = max_iterations {
                registry
                    .update(CriteriaPatch {
                        max_refinement_iterations: Some(max),
                        ..Default::default()
                    })
                    .context("Failed to apply iteration override")?;
            }
            ask::run(orchestrator, prompt, mode.into(), json_output).await
        }
    }
}

fn load_registry(working_dir: &Path, project: &ProjectConfig) -> Result<CriteriaRegistry> {
    let path = project
        .criteria_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("criteria.toml"));
    let path = if path.is_relative() {
        working_dir.join(path)
    } else {
        path
    };

    if path.exists() {
        CriteriaRegistry::load(&path)
            .with_context(|| format!("Invalid criteria configuration in {}", path.display()))
    } else {
        CriteriaRegistry::new(CriteriaConfig::default()).context("Invalid default criteria")
    }
}

async fn serve(
    orchestrator: Arc<Orchestrator>,
    registry: Arc<CriteriaRegistry>,
    project: &ProjectConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host
        .or_else(|| project.server.host.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = port.or(project.server.port).unwrap_or(8080);

    let router = api::create_router(orchestrator, registry);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "gavel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
