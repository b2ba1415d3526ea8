//! Binary entry point: parses flags, loads configuration, and runs the
//! engine until shutdown (§6 CLI/configuration surface).

use std::path::PathBuf;

use clap::Parser;

use arb_engine::{EngineConfig, Engine};

/// Real-time complete-set arbitrage engine.
#[derive(Parser, Debug)]
#[command(name = "arb-engine", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides the configured execution mode ("simulated" or "live").
    #[arg(long)]
    mode: Option<String>,

    /// Overrides the default tracing level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    arb_engine::logging::init_tracing_with_level(&cli.log_level);

    let mut config = match EngineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, path = %cli.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Some(mode) = cli.mode {
        config.mode = mode;
        if let Err(err) = config.validate() {
            tracing::error!(%err, "--mode override produced an invalid configuration");
            std::process::exit(1);
        }
    }

    config.log();

    let engine = Engine::new(config, Vec::new());
    if let Err(err) = engine.run().await {
        tracing::error!(%err, "engine exited with error");
        std::process::exit(1);
    }
}
