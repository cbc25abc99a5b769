use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Wifi,
    Serial,
    Ble,
    /// Stream from a local emulated device
    Sim,
}

/// Record EEG from the acquisition board
#[derive(Debug, Parser)]
#[command(name = "eeg-recorder", version, about)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = TransportArg::Wifi)]
    pub transport: TransportArg,

    /// Find the board with a UDP broadcast before connecting over WiFi
    #[arg(long)]
    pub discover: bool,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub serial_port: Option<String>,

    #[arg(long)]
    pub baud: Option<u32>,

    #[arg(long)]
    pub ble_address: Option<String>,

    /// JSON configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Run a guided acquisition session instead of free recording
    #[arg(long)]
    pub guided: bool,

    /// Output file; defaults to a timestamped file in the output directory
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `eeg_acquisition=trace`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_guided_sim() {
        let cli = Cli::try_parse_from(["eeg-recorder", "--transport", "sim", "--guided", "--duration", "5"]).unwrap();
        assert_eq!(cli.transport, TransportArg::Sim);
        assert!(cli.guided);
        assert_eq!(cli.duration, Some(5.0));
    }
}
