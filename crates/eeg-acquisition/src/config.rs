//! Transport configuration
//!
//! Defaults match the acquisition board firmware: the WiFi access point at
//! 192.168.4.1:3333, the UART at 921600 baud and the BLE notify
//! characteristic `0000fff1-...`.

use eeg_core::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DEVICE_PORT: u16 = 3333;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    pub read_size: usize,
    pub max_buffer: usize,
    /// Send the configure and start frames after connecting
    pub configure_device: bool,
    /// Pause between the configure and the start frame
    #[serde(with = "duration_ms")]
    pub start_delay: Duration,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            port: DEFAULT_DEVICE_PORT,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            read_size: 16384,
            max_buffer: 4 * 1024 * 1024,
            configure_device: true,
            start_delay: Duration::from_millis(100),
        }
    }
}

impl WifiConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    pub read_size: usize,
    pub max_buffer: usize,
    pub start_command: String,
    pub stop_command: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port().to_string(),
            baud: 921_600,
            poll_interval: Duration::from_millis(100),
            read_size: 4096,
            max_buffer: 1024 * 1024,
            start_command: "START_EEG".to_string(),
            stop_command: "STOP_EEG".to_string(),
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(windows) {
        "COM3"
    } else {
        "/dev/ttyUSB0"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Peripheral address as printed by the platform, e.g. `AA:BB:CC:DD:EE:FF`
    pub address: String,
    pub notify_characteristic: String,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub scan_duration: Duration,
    /// How often the link is checked while waiting for notifications
    #[serde(with = "duration_ms")]
    pub keepalive: Duration,
    pub max_buffer: usize,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            notify_characteristic: "0000fff1-0000-1000-8000-00805f9b34fb".to_string(),
            connect_timeout: Duration::from_secs(15),
            scan_duration: Duration::from_secs(5),
            keepalive: Duration::from_millis(200),
            max_buffer: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Where the query is sent; a loopback address works for local devices
    pub broadcast_address: String,
    pub port: u16,
    pub query: String,
    /// Substring a reply must contain to be accepted
    pub identity: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_address: "255.255.255.255".to_string(),
            port: DEFAULT_DEVICE_PORT,
            query: "WHO_IS_EEG?".to_string(),
            identity: "I_AM_EEG_DEVICE".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}
