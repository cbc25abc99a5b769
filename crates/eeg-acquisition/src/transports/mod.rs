//! Physical links to the acquisition board

#[cfg(feature = "ble")]
pub mod ble;
pub mod serial;
pub mod wifi;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use serial::SerialTransport;
pub use wifi::WifiTransport;
