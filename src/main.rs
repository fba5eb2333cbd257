//! WolfElect - Leader Election Orchestrator
//!
//! Runs a batch of election candidates against the coordination service
//! and verifies that leadership moved through them correctly.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::config::WolfElectConfig;
use wolfelect::coord::MemoryEnsemble;
use wolfelect::runner::{self, RunReport};

/// Pause between injected disconnects
const STORM_INTERVAL: Duration = Duration::from_millis(100);

/// WolfElect - Leader Election Orchestrator
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an election and verify the outcome
    Run {
        /// Number of candidates
        #[arg(short = 'n', long)]
        candidates: Option<u32>,

        /// Election path
        #[arg(long)]
        path: Option<String>,

        /// Comma-separated coordination service endpoints (validated only; runs use the in-process ensemble)
        #[arg(long)]
        servers: Option<String>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Inject this many consecutive disconnects once candidates are running
        #[arg(long)]
        disconnect_storm: Option<u32>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show effective configuration
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<wolfelect::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(2);
            ExitCode::from(code as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run {
            candidates,
            path,
            servers,
            json,
            disconnect_storm,
        } => {
            let mut config = load_or_default(&cli.config)?;
            if let Some(candidates) = candidates {
                config.election.candidates = candidates;
            }
            if let Some(path) = path {
                config.election.path = path;
            }
            if let Some(servers) = servers {
                config.coordination.servers = servers;
            }
            config.validate()?;

            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level), &config.logging.format);
            run_election(config, json, disconnect_storm).await
        }
        Commands::Init { output } => {
            run_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => run_validate(&cli.config),
        Commands::Info => {
            run_info(&cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_or_default(path: &Path) -> anyhow::Result<WolfElectConfig> {
    if path.exists() {
        WolfElectConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    } else {
        Ok(WolfElectConfig::default())
    }
}

/// Run one election
async fn run_election(
    config: WolfElectConfig,
    json: bool,
    disconnect_storm: Option<u32>,
) -> anyhow::Result<ExitCode> {
    tracing::info!(
        "Starting election on {} with {} candidates",
        config.election.path,
        config.election.candidates
    );

    tracing::warn!(
        "Using the in-process ensemble; configured servers {} are not contacted",
        config.coordination.server_list().join(", ")
    );
    let ensemble = MemoryEnsemble::new();

    if let Some(disconnects) = disconnect_storm {
        let ensemble = ensemble.clone();
        let delay = config.election.settle_delay() + config.election.work_unit() / 2;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for session_id in ensemble.session_ids().await {
                tracing::warn!("Injecting {} disconnects into session {:#x}", disconnects, session_id);
                for _ in 0..disconnects {
                    if let Err(e) = ensemble.disconnect(session_id).await {
                        tracing::warn!("Disconnect injection failed: {}", e);
                        break;
                    }
                    tokio::time::sleep(STORM_INTERVAL).await;
                }
            }
        });
    }

    let report = tokio::select! {
        result = runner::run(&config, &ensemble) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            return Ok(ExitCode::from(130));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &RunReport) {
    println!();
    for (i, response) in report.verification.responses.iter().enumerate() {
        println!(
            "Election result {}: {} (leader: {})",
            i, response.candidate_id, response.is_leader
        );
    }
    println!();
    for candidate in &report.summary.reports {
        match candidate.ordinal {
            Some(ordinal) => println!("  Candidate #{}: {}", ordinal, candidate.outcome),
            None => println!("  Candidate #?: {}", candidate.outcome),
        }
    }
    println!();
    println!("{}", report.verification.diagnosis());
}

/// Initialize configuration file
fn run_init(output: &Path) -> anyhow::Result<()> {
    let config_content = r#"# WolfElect Configuration
# Generated configuration file

[coordination]
# Comma-separated list of host:port endpoints
servers = "127.0.0.1:2181"
session_timeout_ms = 5000

[election]
path = "/election"
candidates = 3
id_prefix = "n_"
metadata = "president"
leader_wait_timeout_secs = 100
work_unit_ms = 1000
settle_delay_ms = 2000

[session]
max_disconnect_retries = 5

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(output, config_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("Then run with: wolfelect --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> anyhow::Result<ExitCode> {
    match WolfElectConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Servers: {}", config.coordination.server_list().join(", "));
            println!("  Election Path: {}", config.election.path);
            println!("  Candidates: {}", config.election.candidates);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Ok(ExitCode::from(e.exit_code() as u8))
        }
    }
}

/// Show effective configuration
fn run_info(config_path: &Path) -> anyhow::Result<()> {
    let config = load_or_default(config_path)?;

    println!("WolfElect Configuration");
    println!("=======================");
    println!();
    println!("Coordination:");
    println!("  Servers:        {}", config.coordination.server_list().join(", "));
    println!("  Session:        {} ms", config.coordination.session_timeout_ms);
    println!();
    println!("Election:");
    println!("  Path:           {}", config.election.path);
    println!("  Candidates:     {}", config.election.candidates);
    println!("  ID Prefix:      {}", config.election.id_prefix);
    println!("  Metadata:       {}", config.election.metadata);
    println!("  Wait Timeout:   {} s", config.election.leader_wait_timeout_secs);
    println!("  Work Unit:      {} ms", config.election.work_unit_ms);
    println!();
    println!("Session:");
    println!("  Max Disconnects: {}", config.session.max_disconnect_retries);

    Ok(())
}
