//! Recorder configuration file
//!
//! Every section is optional in the JSON file; missing fields take their
//! defaults. Command-line flags are applied on top.

use crate::cli::Cli;
use anyhow::{Context, Result};
use eeg_acquisition::{BleConfig, DiscoveryConfig, SerialConfig, WifiConfig};
use eeg_core::DeviceProfile;
use eeg_processing::{ProcessorSettings, SequencerTimings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidedConfig {
    pub timings: SequencerTimings,
    /// Fixed shuffle seed for reproducible sessions
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub device: DeviceProfile,
    pub processing: ProcessorSettings,
    pub wifi: WifiConfig,
    pub serial: SerialConfig,
    pub ble: BleConfig,
    pub discovery: DiscoveryConfig,
    pub guided: GuidedConfig,
    pub output_dir: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: DeviceProfile::default(),
            processing: ProcessorSettings::default(),
            wifi: WifiConfig::default(),
            serial: SerialConfig::default(),
            ble: BleConfig::default(),
            discovery: DiscoveryConfig::default(),
            guided: GuidedConfig::default(),
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl RecorderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Load the file named on the command line, if any, and apply flag overrides
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.device.validate().context("invalid device profile")?;
        config.processing.validate().context("invalid processing settings")?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.wifi.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.wifi.port = port;
        }
        if let Some(port) = &cli.serial_port {
            self.serial.port = port.clone();
        }
        if let Some(baud) = cli.baud {
            self.serial.baud = baud;
        }
        if let Some(address) = &cli.ble_address {
            self.ble.address = address.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_partial_file_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"device": {{"channel_count": 4}}, "wifi": {{"port": 4000}}, "guided": {{"seed": 7}}}}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["eeg-recorder", "--config", &path, "--host", "10.0.0.2"]).unwrap();
        let config = RecorderConfig::resolve(&cli).unwrap();

        assert_eq!(config.device.channel_count, 4);
        assert_eq!(config.device.gain, 24.0);
        assert_eq!(config.wifi.address(), "10.0.0.2:4000");
        assert_eq!(config.guided.seed, Some(7));
        assert_eq!(config.guided.timings.trial_count, 30);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"device": {{"channel_count": 0}}}}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["eeg-recorder", "--config", &path]).unwrap();
        assert!(RecorderConfig::resolve(&cli).is_err());
    }
}
