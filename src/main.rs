//! `vera` - run a research session from the terminal.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use vera::{EngineConfig, ReportState, ResearchEngine, VectorStatus};

#[derive(Parser, Debug)]
#[command(
    name = "vera",
    version,
    about = "V.E.R.A - Verified Evidence Research Agent"
)]
struct Cli {
    /// The research question
    query: String,

    /// Path to a vera.toml config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Override the refinement bound per vector
    #[arg(long)]
    max_refinements: Option<u8>,

    /// Print the session status after completion
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vera=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(max_refinements) = cli.max_refinements {
        config.orchestrator.max_refinements = max_refinements;
    }

    let engine = Arc::new(ResearchEngine::with_defaults(config));

    eprintln!("{} {}", "Researching:".bold().cyan(), cli.query);

    let session_id = engine.create_session(&cli.query)?;
    engine
        .run_session(session_id)
        .await
        .context("research session failed")?;

    match engine.get_report(session_id)? {
        ReportState::Ready { report } => println!("{report}"),
        ReportState::NotReady => anyhow::bail!("session finished without a report"),
    }

    if cli.status {
        let status = engine.get_session_status(session_id)?;
        eprintln!("\n{}", "Vectors:".bold());
        for v in status.vectors {
            let state = match v.status {
                VectorStatus::Verified => "verified".green().to_string(),
                VectorStatus::Exhausted => "exhausted".yellow().to_string(),
                other => other.to_string(),
            };
            eprintln!(
                "  {} [{}] {} ({} refinements)",
                v.id.to_string().dimmed(),
                state,
                v.topic,
                v.refinement_count
            );
        }
    }

    Ok(())
}
