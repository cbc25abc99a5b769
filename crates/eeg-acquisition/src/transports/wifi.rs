//! WiFi transport: TCP client against the board's access point
//!
//! After connecting, the host sends a configure frame for the profile's
//! sample rate and channel count, then a start frame. Reads time out and
//! retry; a closed socket ends the stream.

use crate::config::WifiConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::receiver::{ReceiverContext, Transport, TransportKind};
use async_trait::async_trait;
use eeg_core::protocol::{DeviceCommand, FrameLayout};
use eeg_core::DeviceProfile;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct WifiTransport {
    config: WifiConfig,
}

impl WifiTransport {
    pub fn new(config: WifiConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WifiConfig {
        &self.config
    }

    /// Send configure, wait, send start; `false` when cancelled in between
    async fn configure(
        &self,
        socket: &mut TcpStream,
        profile: &DeviceProfile,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<bool> {
        if !self.config.configure_device {
            return Ok(true);
        }
        let configure = DeviceCommand::configure(profile);
        info!(?configure, "configuring device");
        socket.write_all(&configure.encode()).await?;

        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = sleep(self.config.start_delay) => {}
        }
        socket.write_all(&DeviceCommand::Start.encode()).await?;
        socket.flush().await?;
        debug!("start command sent");
        Ok(true)
    }
}

#[async_trait]
impl Transport for WifiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wifi
    }

    fn target(&self) -> String {
        self.config.address()
    }

    fn layout(&self) -> FrameLayout {
        FrameLayout::Protected
    }

    fn max_buffer(&self) -> usize {
        self.config.max_buffer
    }

    async fn stream(&mut self, ctx: &mut ReceiverContext) -> AcquisitionResult<()> {
        let target = self.target();
        let cancel = ctx.cancel_token();

        let connect = timeout(self.config.connect_timeout, TcpStream::connect(&target));
        let mut socket = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            connected = connect => match connected {
                Ok(socket) => socket?,
                Err(_) => {
                    return Err(AcquisitionError::ConnectTimeout {
                        target,
                        timeout: self.config.connect_timeout,
                    })
                }
            },
        };
        socket.set_nodelay(true)?;
        ctx.connected(target).await;

        let profile = ctx.profile().clone();
        let result = match self.configure(&mut socket, &profile, &cancel).await {
            Ok(true) => {
                ctx.pump(&mut socket, self.config.read_timeout, self.config.read_size)
                    .await
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = socket.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
        result
    }
}
