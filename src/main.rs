//! Opsmedic CLI
//!
//! Entry point for the troubleshooting agent. Handles CLI args, config
//! loading, and wiring the agent runner to a console update consumer.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use tokio::signal;

use opsmedic::agent::controller::AgentRunner;
use opsmedic::agent::decision::LlmDecisionEngine;
use opsmedic::config;
use opsmedic::types::{AgentContext, AgentUpdate, IterationStatus, UpdateKind};

const VERSION: &str = "0.1.0";

/// Opsmedic -- Autonomous Infrastructure Troubleshooting Agent
#[derive(Parser, Debug)]
#[command(
    name = "opsmedic",
    version = VERSION,
    about = "Autonomous AWS/Terraform troubleshooting agent"
)]
struct Cli {
    /// Run the agent against a problem description
    #[arg(long)]
    run: bool,

    /// Show current configuration status
    #[arg(long)]
    status: bool,

    /// Target environment name
    #[arg(long, default_value = "dev")]
    env: String,

    /// The problem or error to troubleshoot
    #[arg(long)]
    problem: Option<String>,

    /// AWS profile (overrides config)
    #[arg(long)]
    profile: Option<String>,

    /// AWS region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Maximum loop iterations (overrides config)
    #[arg(long)]
    limit: Option<usize>,

    /// Working directory holding the infrastructure repo
    #[arg(long)]
    working_dir: Option<String>,
}

// ---- Status Command ---------------------------------------------------------

fn show_status() {
    let config_path = config::get_config_path();
    if !config_path.exists() {
        println!(
            "Not configured. Create {} or set ANTHROPIC_API_KEY.",
            config_path.display()
        );
        return;
    }

    let cfg = config::load_config();
    println!(
        r#"
=== OPSMEDIC STATUS ===
Config:     {}
API URL:    {}
API key:    {}
Model:      {}
Iterations: {}
Profile:    {}
Region:     {}
=======================
"#,
        config_path.display(),
        cfg.api_url,
        if cfg.api_key.is_empty() { "missing" } else { "set" },
        cfg.model,
        cfg.iteration_limit,
        if cfg.aws_profile.is_empty() { "-" } else { &cfg.aws_profile },
        if cfg.aws_region.is_empty() { "-" } else { &cfg.aws_region },
    );
}

// ---- Console Consumer -------------------------------------------------------

/// Drain updates from the runner and render them for the operator.
async fn consume_updates(mut rx: tokio::sync::mpsc::Receiver<AgentUpdate>) {
    while let Some(update) = rx.recv().await {
        match update.kind {
            UpdateKind::Started => println!("{}", update.message.bold()),
            UpdateKind::Thinking => println!("{}", update.message.dimmed()),
            UpdateKind::ActionStart => {
                if let Some(ref iter) = update.iteration {
                    println!(
                        "{} {}",
                        format!("[{}]", iter.number).cyan(),
                        iter.thought
                    );
                    println!("    {} {}", "→".cyan(), iter.command);
                }
            }
            UpdateKind::ActionComplete => {
                if let Some(ref iter) = update.iteration {
                    let status = match iter.status {
                        IterationStatus::Failed => "failed".red(),
                        _ => "ok".green(),
                    };
                    println!(
                        "    {} ({:.1}s)",
                        status,
                        iter.duration.as_secs_f64()
                    );
                    if let Some(ref detail) = iter.error_detail {
                        println!("    {}", detail.red());
                    }
                }
            }
            UpdateKind::Error => println!("{}", update.message.red()),
            UpdateKind::Finished => {
                if update.success {
                    println!("{}", update.message.green().bold());
                } else {
                    println!("{}", update.message.red().bold());
                }
            }
        }
    }
}

// ---- Main Run ---------------------------------------------------------------

async fn run(cli: Cli) -> Result<bool> {
    let cfg = config::load_config();
    if cfg.api_key.is_empty() {
        bail!(
            "No API key found. Set ANTHROPIC_API_KEY or add api_key to {}",
            config::get_config_path().display()
        );
    }

    let problem = match cli.problem {
        Some(p) if !p.trim().is_empty() => p,
        _ => bail!("--problem is required with --run"),
    };

    let working_dir = match cli.working_dir {
        Some(dir) => std::path::PathBuf::from(config::resolve_path(&dir)),
        None => std::env::current_dir()?,
    };

    let context = AgentContext {
        operation: "troubleshooting".to_string(),
        environment: cli.env,
        aws_profile: cli.profile.unwrap_or(cfg.aws_profile),
        aws_region: cli.region.unwrap_or(cfg.aws_region),
        working_dir,
        initial_error: problem,
        resource_errors: vec![],
    };

    let engine = Arc::new(LlmDecisionEngine::new(
        cfg.api_url,
        cfg.api_key,
        cfg.model,
        cfg.max_tokens,
    ));

    let limit = cli.limit.unwrap_or(cfg.iteration_limit);
    let (runner, rx) = AgentRunner::new(context, engine, limit);
    let cancel = runner.cancel_token();

    // Ctrl+C cancels the run; in-flight tools are interrupted.
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling run...");
            cancel.cancel();
        }
    });

    let consumer = tokio::spawn(consume_updates(rx));
    let state = runner.run().await;
    let _ = consumer.await;

    Ok(state.final_outcome.map(|o| o.is_success()).unwrap_or(false))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.status {
        show_status();
        return Ok(());
    }

    if cli.run {
        let success = run(cli).await?;
        if !success {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("Nothing to do. Try: opsmedic --run --problem \"...\" (see --help)");
    Ok(())
}
