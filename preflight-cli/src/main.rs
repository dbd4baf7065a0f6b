//! Preflight CLI - session simulator and environment probe.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "preflight", version, about = "Predictive module preloading engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a seeded synthetic session and print the report
    Simulate {
        /// RNG seed; the same seed replays the same session
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of simulated interactions
        #[arg(long, default_value_t = 60)]
        interactions: u32,
        /// Simulated device memory in GB
        #[arg(long, default_value_t = 8.0)]
        memory_gb: f64,
        /// Simulated logical core count
        #[arg(long, default_value_t = 8)]
        cores: usize,
        /// Simulate a save-data connection (minimal mode)
        #[arg(long)]
        save_data: bool,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the environment profile detected on this host
    Probe {
        /// Emit the profile as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("preflight=info,preflight_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Command::Simulate {
            seed,
            interactions,
            memory_gb,
            cores,
            save_data,
            json,
        } => {
            commands::simulate::run(SimulateArgs {
                seed,
                interactions,
                memory_gb,
                cores,
                save_data,
                json,
            })
            .await
        }
        Command::Probe { json } => commands::probe::run(json),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
