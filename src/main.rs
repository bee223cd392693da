use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrivener::config::{AppConfig, LogFormat};
use scrivener::server::{create_router, AppState};
use scrivener::shutdown::{graceful_shutdown, wait_for_shutdown};
use scrivener::workflow::ArticleRequest;

#[derive(Parser)]
#[command(name = "scrivener", about = "Research, draft, fact-check and polish articles")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Run one article through the pipeline and print it
    Generate {
        /// Article topic
        #[arg(long)]
        topic: String,
        /// File containing the requirements document
        #[arg(long)]
        requirements: PathBuf,
        /// Target length in words
        #[arg(long)]
        target_length: Option<u32>,
        /// Writing style
        #[arg(long)]
        style: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Diagnostics go to stderr so `generate` output on stdout stays clean.
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(config.logging.format);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Generate {
            topic,
            requirements,
            target_length,
            style,
        } => generate(config, topic, requirements, target_length, style).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        max_iterations = config.pipeline.max_iterations,
        max_concurrent_runs = config.server.max_concurrent_runs,
        "Starting Scrivener server"
    );

    let state = Arc::new(AppState::new(config.clone()).await?);
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}

async fn generate(
    config: AppConfig,
    topic: String,
    requirements: PathBuf,
    target_length: Option<u32>,
    style: Option<String>,
) -> anyhow::Result<()> {
    let requirements_text = std::fs::read_to_string(&requirements)
        .with_context(|| format!("reading requirements from {}", requirements.display()))?;
    let request = ArticleRequest::new(requirements_text, topic, target_length, style)?;

    let state = AppState::new(config).await?;
    let success = state.orchestrator.run(request).await?;

    println!("{}", success.final_artifact);
    eprintln!("{}", serde_json::to_string_pretty(&success.metadata)?);

    Ok(())
}
