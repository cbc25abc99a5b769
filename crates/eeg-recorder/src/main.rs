//! EEG Recorder - acquisition board to JSON recording
//!
//! Gesture detection is left to library users: it needs a trained
//! classifier, which the recorder does not ship.

mod app;
mod cli;
mod config;
mod store;

use anyhow::Result;
use app::RecorderApp;
use clap::Parser;
use cli::Cli;
use config::RecorderConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RecorderConfig::resolve(&cli)?;
    info!(
        transport = ?cli.transport,
        channels = config.device.channel_count,
        sample_rate = config.device.sample_rate,
        "starting EEG recorder"
    );

    RecorderApp::new(config, &cli)?.run().await
}
