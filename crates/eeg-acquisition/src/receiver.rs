//! Receiver task shared by every transport
//!
//! A [`Transport`] owns the physical connection and pushes raw bytes into a
//! [`ReceiverContext`], which runs them through the core
//! [`StreamDecoder`] and fans the results out on broadcast channels.
//! [`ReceiverTask`] drives one transport on its own tokio task.

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::events::{ConnectionStatus, ReceiverEvent, ReceiverStats};
use async_trait::async_trait;
use eeg_core::protocol::{DecodeEvent, FrameLayout, StreamDecoder};
use eeg_core::{DeviceProfile, SampleChunk};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Runtime reconfiguration requests
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverCommand {
    SetFramesPerPacket(usize),
    SetChannelCount(usize),
    SetGain(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Wifi,
    Serial,
    Ble,
}

/// One physical link to the acquisition board
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Human readable connect target
    fn target(&self) -> String;

    fn layout(&self) -> FrameLayout;

    /// Unconsumed byte cap before the framer clears its buffer
    fn max_buffer(&self) -> usize;

    /// Connect and stream until cancelled or the link fails
    ///
    /// Implementations report `Connected` through the context once the link
    /// is up. Returning `Ok` means a clean stop or a peer-closed connection.
    async fn stream(&mut self, ctx: &mut ReceiverContext) -> AcquisitionResult<()>;
}

/// Decoding state and output channels handed to a running transport
pub struct ReceiverContext {
    decoder: StreamDecoder,
    chunks: broadcast::Sender<SampleChunk>,
    events: broadcast::Sender<ReceiverEvent>,
    commands: mpsc::Receiver<ReceiverCommand>,
    cancel: CancellationToken,
    stats: Arc<Mutex<ReceiverStats>>,
}

impl ReceiverContext {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn packet_size(&self) -> usize {
        self.decoder.packet_size()
    }

    pub fn profile(&self) -> &DeviceProfile {
        self.decoder.profile()
    }

    pub fn status(&self, status: ConnectionStatus) {
        info!(%status, "receiver status");
        let _ = self.events.send(ReceiverEvent::Status(status));
    }

    /// Mark the link as up and start counting from zero
    pub async fn connected(&mut self, target: String) {
        self.decoder.reset();
        *self.stats.lock().await = ReceiverStats {
            is_connected: true,
            ..ReceiverStats::default()
        };
        self.status(ConnectionStatus::Connected { target });
    }

    /// Next reconfiguration request; `None` once every sender is gone
    pub async fn next_command(&mut self) -> Option<ReceiverCommand> {
        self.commands.recv().await
    }

    pub fn apply(&mut self, command: ReceiverCommand) {
        let result = match command {
            ReceiverCommand::SetFramesPerPacket(frames) => self.decoder.set_frames_per_packet(frames),
            ReceiverCommand::SetChannelCount(channels) => self.decoder.set_channel_count(channels),
            ReceiverCommand::SetGain(gain) => self.decoder.set_gain(gain),
        };
        match result {
            Ok(()) => {
                let _ = self.events.send(ReceiverEvent::Reconfigured {
                    packet_size: self.decoder.packet_size(),
                });
            }
            Err(e) => warn!(error = %e, "receiver reconfiguration rejected"),
        }
    }

    /// Decode received bytes and publish everything they complete
    ///
    /// Returns the number of chunks emitted.
    pub async fn ingest(&mut self, bytes: &[u8]) -> usize {
        let before = self.decoder.stats();
        let mut decoded = 0;
        let mut lost = 0u64;
        let mut dropped = 0u64;

        for event in self.decoder.feed(bytes) {
            match event {
                DecodeEvent::Chunk { seq, chunk } => {
                    trace!(?seq, frames = chunk.frames(), "chunk decoded");
                    decoded += 1;
                    // No subscribers is not an error; the stream keeps running
                    let _ = self.chunks.send(chunk);
                }
                DecodeEvent::Loss { missing, last, current } => {
                    lost += u64::from(missing);
                    let _ = self.events.send(ReceiverEvent::PacketLoss { missing, last, current });
                }
                DecodeEvent::Dropped { reason } => {
                    dropped += 1;
                    let _ = self.events.send(ReceiverEvent::PacketDropped { reason });
                }
            }
        }

        let after = self.decoder.stats();
        let mut stats = self.stats.lock().await;
        stats.bytes_received += bytes.len() as u64;
        stats.chunks_decoded += decoded as u64;
        stats.packets_lost += lost;
        stats.packets_dropped += dropped;
        stats.sync_losses += after.sync_losses.saturating_sub(before.sync_losses);
        stats.overflow_clears += after.overflow_clears.saturating_sub(before.overflow_clears);
        decoded
    }

    /// Read from a byte stream until cancelled or the peer hangs up
    ///
    /// A read that times out is retried; a zero-length read is a disconnect.
    pub async fn pump<R>(&mut self, reader: &mut R, read_timeout: Duration, read_size: usize) -> AcquisitionResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cancel = self.cancel_token();
        let mut buffer = vec![0u8; read_size.max(1)];
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("receiver cancelled");
                    return Ok(());
                }
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.apply(command),
                        None => commands_open = false,
                    }
                }
                read = timeout(read_timeout, reader.read(&mut buffer)) => {
                    match read {
                        Err(_) => trace!("read timed out, retrying"),
                        Ok(Ok(0)) => {
                            info!("peer closed the connection");
                            return Ok(());
                        }
                        Ok(Ok(n)) => {
                            self.ingest(&buffer[..n]).await;
                        }
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

/// A transport paired with its decoder, ready to be spawned
pub struct ReceiverTask {
    transport: Box<dyn Transport>,
    context: ReceiverContext,
    chunk_sender: broadcast::Sender<SampleChunk>,
    event_sender: broadcast::Sender<ReceiverEvent>,
    command_sender: mpsc::Sender<ReceiverCommand>,
}

impl ReceiverTask {
    pub fn new(transport: Box<dyn Transport>, profile: DeviceProfile) -> AcquisitionResult<Self> {
        let decoder = StreamDecoder::new(profile, transport.layout(), transport.max_buffer())?;
        let (chunk_sender, _) = broadcast::channel(256);
        let (event_sender, _) = broadcast::channel(64);
        let (command_sender, command_receiver) = mpsc::channel(16);

        let context = ReceiverContext {
            decoder,
            chunks: chunk_sender.clone(),
            events: event_sender.clone(),
            commands: command_receiver,
            cancel: CancellationToken::new(),
            stats: Arc::new(Mutex::new(ReceiverStats::default())),
        };

        Ok(Self {
            transport,
            context,
            chunk_sender,
            event_sender,
            command_sender,
        })
    }

    /// Subscribe before spawning to see every chunk
    pub fn subscribe_chunks(&self) -> broadcast::Receiver<SampleChunk> {
        self.chunk_sender.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.event_sender.subscribe()
    }

    /// Run the transport to completion on the current task
    pub async fn run(mut self) -> AcquisitionResult<()> {
        let kind = self.transport.kind();
        let target = self.transport.target();
        info!(?kind, %target, "receiver starting");
        self.context.status(ConnectionStatus::Connecting { target });

        let result = self.transport.stream(&mut self.context).await;
        if let Err(e) = &result {
            warn!(?kind, error = %e, "receiver failed");
            self.context.status(ConnectionStatus::Error {
                message: e.to_string(),
            });
        }

        *self.context.stats.lock().await = ReceiverStats::default();
        self.context.status(ConnectionStatus::Disconnected);
        result
    }

    pub fn spawn(self) -> ReceiverHandle {
        let chunks = self.chunk_sender.clone();
        let events = self.event_sender.clone();
        let commands = self.command_sender.clone();
        let cancel = self.context.cancel_token();
        let stats = self.context.stats.clone();
        let task = tokio::spawn(self.run());

        ReceiverHandle {
            chunks,
            events,
            commands,
            cancel,
            stats,
            task,
        }
    }
}

/// Control surface of a spawned receiver
pub struct ReceiverHandle {
    chunks: broadcast::Sender<SampleChunk>,
    events: broadcast::Sender<ReceiverEvent>,
    commands: mpsc::Sender<ReceiverCommand>,
    cancel: CancellationToken,
    stats: Arc<Mutex<ReceiverStats>>,
    task: JoinHandle<AcquisitionResult<()>>,
}

impl ReceiverHandle {
    pub fn subscribe_chunks(&self) -> broadcast::Receiver<SampleChunk> {
        self.chunks.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.events.subscribe()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<ReceiverStats>> {
        self.stats.clone()
    }

    pub async fn send(&self, command: ReceiverCommand) -> AcquisitionResult<()> {
        self.commands.send(command).await.map_err(|_| AcquisitionError::Task {
            reason: "receiver is no longer running".into(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the transport and wait for it to close its connection
    pub async fn stop(self) -> AcquisitionResult<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the transport to end on its own
    pub async fn join(self) -> AcquisitionResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AcquisitionError::Task { reason: e.to_string() }),
        }
    }
}
