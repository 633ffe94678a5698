//! Finality node binary.
//!
//! Loads the finality configuration, installs logging from its `[logging]`
//! table and runs the engine against a simulated quorum.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use finality_engine::AvalancheConfig;
use finality_utils::logging::{self, LogLevel};
use tracing::{error, info};

mod simulation;

use simulation::Simulation;

/// Avalanche finality CLI
#[derive(Parser)]
#[command(name = "finality-node")]
#[command(version)]
#[command(about = "Avalanche post-consensus finality", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "finality.toml")]
    config: PathBuf,

    /// Overrides the configured log level
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against simulated peers
    Simulate {
        /// Number of quorum peers
        #[arg(short, long, default_value = "8")]
        peers: usize,
        /// Stake weight of each peer
        #[arg(short, long, default_value = "100")]
        weight: u64,
        /// Blocks to mine
        #[arg(short, long, default_value = "10")]
        blocks: usize,
        /// Poll rounds allowed per block
        #[arg(long, default_value = "100")]
        max_rounds: usize,
    },
    /// Write a default configuration file
    Init,
    /// Validate configuration
    Validate,
}

fn load_config(cli: &Cli) -> Result<AvalancheConfig, Box<dyn std::error::Error>> {
    let mut config = if cli.config.exists() {
        AvalancheConfig::load(&cli.config)?
    } else {
        AvalancheConfig::regtest()
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Init) = cli.command {
        let config = AvalancheConfig::default();
        logging::init(&config.logging)?;
        config.save(&cli.config)?;
        info!("Configuration written to {:?}", cli.config);
        return Ok(());
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging)?;

    match cli.command {
        Some(Commands::Validate) => {
            info!("Configuration at {:?} is valid", cli.config);
            info!(
                threshold = config.confidence_threshold,
                rounds = config.finalization_rounds,
                fanout = config.fanout,
                "Decision rule"
            );
        }
        Some(Commands::Simulate {
            peers,
            weight,
            blocks,
            max_rounds,
        }) => simulate(config, peers, weight, blocks, max_rounds).await,
        None => simulate(config, 8, 100, 10, 100).await,
        Some(Commands::Init) => {}
    }

    Ok(())
}

async fn simulate(
    config: AvalancheConfig,
    peers: usize,
    weight: u64,
    blocks: usize,
    max_rounds: usize,
) {
    info!(peers, weight, blocks, "Starting finality simulation");
    let mut sim = match Simulation::new(config, peers, weight) {
        Ok(sim) => sim,
        Err(e) => {
            error!("Failed to start simulation: {}", e);
            std::process::exit(1);
        }
    };
    match sim.run(blocks, max_rounds).await {
        Ok(report) => info!(
            mined = report.mined,
            finalized = report.finalized,
            rounds = report.rounds,
            "Simulation finished"
        ),
        Err(e) => {
            error!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    }
}
