use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nimbus_core::EmulatorConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod scenario;

#[derive(Parser)]
#[command(
    name = "nimbus",
    about = "Nimbus — in-process cloud fleet emulator",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a fleet scenario and print the results as JSON.
    ///
    /// Results go to stdout; logs go to stderr.
    Run {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,
        /// Emulator configuration (nimbus.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },
    /// Print a starter nimbus.toml
    Init {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            json_logs,
        } => {
            let config = match config {
                Some(path) => EmulatorConfig::from_file(&path)?,
                None => EmulatorConfig::default(),
            };
            init_tracing(&config, json_logs)?;
            commands::run::run(&scenario, config)
        }
        Commands::Init { output } => commands::init::init(output.as_deref()),
    }
}

/// `RUST_LOG` wins over `[logging].filter`, which wins over the default.
fn init_tracing(config: &EmulatorConfig, json_logs: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter())?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json_logs || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
