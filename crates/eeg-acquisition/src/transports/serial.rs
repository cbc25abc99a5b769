//! Serial transport: UART link with ASCII start/stop commands

use crate::config::SerialConfig;
use crate::error::AcquisitionResult;
use crate::receiver::{ReceiverContext, Transport, TransportKind};
use async_trait::async_trait;
use eeg_core::protocol::FrameLayout;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
use tracing::{info, warn};

pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn target(&self) -> String {
        format!("{} @ {}", self.config.port, self.config.baud)
    }

    fn layout(&self) -> FrameLayout {
        FrameLayout::Protected
    }

    fn max_buffer(&self) -> usize {
        self.config.max_buffer
    }

    async fn stream(&mut self, ctx: &mut ReceiverContext) -> AcquisitionResult<()> {
        let mut port = tokio_serial::new(&self.config.port, self.config.baud).open_native_async()?;
        // Stale bytes from a previous session would only cost a resync
        port.clear(ClearBuffer::Input)?;
        run_command_link(&mut port, &self.config, self.target(), ctx).await
    }
}

/// Start the device, stream, and send the stop command on the way out
///
/// The stop command is written even when streaming failed, so the board
/// stops transmitting into a port nobody reads.
pub async fn run_command_link<P>(
    port: &mut P,
    config: &SerialConfig,
    target: String,
    ctx: &mut ReceiverContext,
) -> AcquisitionResult<()>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!(command = %config.start_command, "sending start command");
    port.write_all(config.start_command.as_bytes()).await?;
    port.flush().await?;
    ctx.connected(target).await;

    let result = ctx.pump(port, config.poll_interval, config.read_size).await;

    info!(command = %config.stop_command, "sending stop command");
    let stopped = async {
        port.write_all(config.stop_command.as_bytes()).await?;
        port.flush().await
    };
    if let Err(e) = stopped.await {
        warn!(error = %e, "could not send stop command");
    }
    result
}
