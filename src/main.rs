//! CLI entry point for replay-hub.
//!
//! # Usage
//!
//! Record the network bus:
//! ```bash
//! replay-hub --input network-bus --output disk --file session.xio.gz
//! ```
//!
//! Replay it:
//! ```bash
//! replay-hub --input disk --output network-bus --file session.xio.gz
//! ```
//!
//! Options can also come from a TOML file (`--config hub.toml`) and from
//! `REPLAY_HUB_*` environment variables; command-line options win.

use anyhow::{Context, Result};
use clap::Parser;
use replay_hub::config::{ConfigOverrides, HubConfig};
use replay_hub::logging::{self, OutputFormat, TracingConfig};
use replay_hub::Hub;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replay-hub")]
#[command(about = "Record, replay and relay timestamped sensor events", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::load(cli.config.as_deref(), &cli.overrides)
        .context("Failed to load configuration")?;

    let tracing_config = TracingConfig::from_hub_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    tracing::info!(input = %config.input, output = %config.output, "replay-hub starting");

    let hub = Hub::builder(config).start().context("Failed to start hub")?;
    hub.run().context("Hub shut down with errors")?;
    Ok(())
}
