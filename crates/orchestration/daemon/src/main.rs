//! orchestrd - runs orchestration plans
//!
//! - `run` executes a plan file to completion and prints a summary
//! - `validate` checks a plan file against the built-in registries

use clap::{Parser, Subcommand};
use orchestration_daemon::{
    load_plan, parse_setup, validate, DaemonConfig, DaemonResult, PlanRunner, RunSummary,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// orchestrd CLI
#[derive(Parser)]
#[command(name = "orchestrd")]
#[command(about = "Runs and validates orchestration plans", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ORCHESTRATION_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "ORCHESTRATION_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ORCHESTRATION_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a plan to completion
    Run {
        /// Plan document (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Setup abstraction, repeatable
        #[arg(short, long = "setup", value_name = "KEY=VALUE")]
        setup: Vec<String>,

        /// Number of engine workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        summary_json: bool,
    },
    /// Validate a plan without running it
    Validate {
        /// Plan document (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> DaemonResult<ExitCode> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command {
        Command::Validate { plan } => {
            let loaded = load_plan(&plan)?;
            validate(&loaded, &config)?;
            println!("{}: {} nodes, valid", plan.display(), loaded.node_count());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            plan,
            setup,
            workers,
            summary_json,
        } => {
            if let Some(workers) = workers {
                config.engine.workers = workers;
            }
            let loaded = load_plan(&plan)?;
            let setup = parse_setup(&setup)?;

            let runner = PlanRunner::start(&config)?;
            let stop = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            };
            let summary = runner.run_until(loaded, setup, stop).await;
            runner.shutdown().await;
            let summary = summary?;

            if summary_json {
                let rendered =
                    serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
                println!("{}", rendered);
            } else {
                print_summary(&summary);
            }

            Ok(if summary.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("plan execution {}: {}", summary.plan_execution_id, summary.status);
    if let Some(failure) = &summary.failure {
        println!("  failure: {}", failure);
    }
    for node in &summary.nodes {
        let duration = node
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<22} attempt {:<3} {}",
            node.plan_node_id,
            node.status.to_string(),
            node.attempt,
            duration
        );
    }
}
