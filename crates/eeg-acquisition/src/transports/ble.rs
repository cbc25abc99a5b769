//! Bluetooth LE transport
//!
//! Subscribes to the board's notify characteristic. Notifications are
//! smaller than a packet and arrive whenever the link delivers them; each
//! one is appended to the framer, which resynchronizes on the header. BLE
//! packets carry no sequence number or CRC.

use crate::config::BleConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::receiver::{ReceiverContext, Transport, TransportKind};
use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use eeg_core::protocol::FrameLayout;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct BleTransport {
    config: BleConfig,
}

impl BleTransport {
    pub fn new(config: BleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    fn characteristic_uuid(&self) -> AcquisitionResult<Uuid> {
        Uuid::parse_str(&self.config.notify_characteristic).map_err(|e| AcquisitionError::BleDevice {
            reason: format!("bad characteristic uuid '{}': {}", self.config.notify_characteristic, e),
        })
    }

    async fn adapter() -> AcquisitionResult<Adapter> {
        let manager = Manager::new().await?;
        manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AcquisitionError::BleDevice {
                reason: "no bluetooth adapter found".into(),
            })
    }

    /// Scan until the configured address shows up or the scan window closes
    async fn find_peripheral(&self, adapter: &Adapter) -> AcquisitionResult<Peripheral> {
        adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + self.config.scan_duration;
        let found = loop {
            let peripherals = adapter.peripherals().await?;
            if let Some(p) = peripherals
                .into_iter()
                .find(|p| p.address().to_string().eq_ignore_ascii_case(&self.config.address))
            {
                break Some(p);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        };
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }
        found.ok_or_else(|| AcquisitionError::BleDevice {
            reason: format!("device {} not found", self.config.address),
        })
    }

    async fn notify_characteristic(&self, peripheral: &Peripheral) -> AcquisitionResult<Characteristic> {
        let uuid = self.characteristic_uuid()?;
        peripheral.discover_services().await?;
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.properties.contains(CharPropFlags::NOTIFY))
            .ok_or_else(|| AcquisitionError::BleDevice {
                reason: format!("notify characteristic {} not found", uuid),
            })
    }

    /// Everything after a successful connect; the caller disconnects
    async fn session(&self, peripheral: &Peripheral, ctx: &mut ReceiverContext) -> AcquisitionResult<()> {
        let characteristic = self.notify_characteristic(peripheral).await?;
        peripheral.subscribe(&characteristic).await?;
        let result = self.pump_notifications(peripheral, &characteristic, ctx).await;
        if let Err(e) = peripheral.unsubscribe(&characteristic).await {
            debug!(error = %e, "unsubscribe failed");
        }
        result
    }

    async fn pump_notifications(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        ctx: &mut ReceiverContext,
    ) -> AcquisitionResult<()> {
        let mut notifications = peripheral.notifications().await?;
        ctx.connected(self.target()).await;

        let cancel = ctx.cancel_token();
        let mut keepalive = interval(self.config.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                command = ctx.next_command(), if commands_open => {
                    match command {
                        Some(command) => ctx.apply(command),
                        None => commands_open = false,
                    }
                }
                notification = notifications.next() => {
                    match notification {
                        Some(n) if n.uuid == characteristic.uuid => {
                            ctx.ingest(&n.value).await;
                        }
                        Some(_) => {}
                        None => {
                            info!("notification stream ended");
                            return Ok(());
                        }
                    }
                }
                _ = keepalive.tick() => {
                    match peripheral.is_connected().await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("peripheral disconnected");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn target(&self) -> String {
        self.config.address.clone()
    }

    fn layout(&self) -> FrameLayout {
        FrameLayout::Unprotected
    }

    fn max_buffer(&self) -> usize {
        self.config.max_buffer
    }

    async fn stream(&mut self, ctx: &mut ReceiverContext) -> AcquisitionResult<()> {
        let adapter = Self::adapter().await?;
        let peripheral = self.find_peripheral(&adapter).await?;

        let connected = timeout(self.config.connect_timeout, peripheral.connect()).await;
        let connected = match connected {
            Ok(connected) => connected.map_err(AcquisitionError::from),
            Err(_) => Err(AcquisitionError::ConnectTimeout {
                target: self.target(),
                timeout: self.config.connect_timeout,
            }),
        };
        match connected {
            Ok(()) => finish_with(self.session(&peripheral, ctx), peripheral.disconnect()).await,
            Err(e) => {
                // A timed-out connect may still complete in the background
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }
}

/// Await the session, then run the teardown whatever the session returned
async fn finish_with<S, D, E>(session: S, teardown: D) -> AcquisitionResult<()>
where
    S: Future<Output = AcquisitionResult<()>>,
    D: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let result = session.await;
    if let Err(e) = teardown.await {
        warn!(error = %e, "bluetooth disconnect failed");
    }
    result
}
