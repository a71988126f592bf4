use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use traffic_fusion::{
    Config,
    bus::{KafkaBus, MemoryBus},
    launcher,
};

/// Sensor-fusion traffic signal control over a message bus
#[derive(Parser, Debug)]
#[command(name = "traffic_fusion", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish simulated IR, ultrasonic and RFID readings
    Sensors,
    /// Aggregate and validate sensor readings
    Gateway,
    /// Compute the final green-light decision
    Controller,
    /// Render the intersection status in the terminal
    Dashboard,
    /// Run every component in this process
    All {
        /// Use an in-process bus instead of Kafka
        #[arg(long)]
        in_memory: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "traffic_fusion=info",
        1 => "traffic_fusion=debug",
        _ => "traffic_fusion=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout belongs to the dashboard
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.bus.bootstrap_servers(),
        green_min = config.timing.green_min,
        green_max = config.timing.green_max,
        "traffic_fusion starting"
    );

    tokio::select! {
        result = run(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("stopped by user");
            Ok(())
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    if let Command::All { in_memory: true } = command {
        launcher::run_all(config, MemoryBus::default()).await?;
        return Ok(());
    }

    let bus = KafkaBus::connect(&config.bus)
        .with_context(|| format!("cannot create Kafka client for {}", config.bus.bootstrap_servers()))?;

    match command {
        Command::Sensors => launcher::run_sensors(config, bus).await?,
        Command::Gateway => launcher::run_gateway(config, bus).await?,
        Command::Controller => launcher::run_controller(config, bus).await?,
        Command::Dashboard => launcher::run_dashboard(config, bus).await?,
        Command::All { .. } => launcher::run_all(config, bus).await?,
    }
    Ok(())
}
