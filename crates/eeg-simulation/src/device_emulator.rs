//! TCP device emulator speaking the WiFi wire protocol
//!
//! Listens like the acquisition board's access point and streams encoded
//! packets of synthetic EEG to one client at a time. Faults can be
//! injected through [`EmulatorCommand`] to exercise resync and loss paths.
//! Control frames written by the client are parsed and republished as
//! [`DeviceCommand`]s.

use crate::eeg_simulator::{EegSimulator, EegSimulatorConfig};
use crate::error::SimulationResult;
use crate::packet_encoder::PacketEncoder;
use crate::signal_patterns::SignalPattern;
use eeg_core::protocol::{CommandParser, DeviceCommand, FrameLayout};
use eeg_core::DeviceProfile;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the emulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub simulator: EegSimulatorConfig,
    pub v_ref: f64,
    pub gain: f64,
    pub frames_per_packet: usize,
    pub layout: FrameLayout,
    /// Pace packets at the sample rate; otherwise send as fast as the socket allows
    pub realtime: bool,
    /// Close each connection after this many packets
    pub packet_limit: Option<u64>,
    /// Hold packets back until the client sends a start frame
    pub await_start: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        let profile = DeviceProfile::default();
        Self {
            simulator: EegSimulatorConfig::default(),
            v_ref: profile.v_ref,
            gain: profile.gain,
            frames_per_packet: profile.frames_per_packet,
            layout: FrameLayout::Protected,
            realtime: true,
            packet_limit: None,
            await_start: true,
        }
    }
}

impl EmulatorConfig {
    /// Device profile a receiver needs to decode this stream
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            channel_count: self.simulator.channel_count,
            sample_rate: self.simulator.sample_rate,
            v_ref: self.v_ref,
            gain: self.gain,
            frames_per_packet: self.frames_per_packet,
        }
    }

    pub fn packet_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_packet as f64 / self.simulator.sample_rate as f64)
    }
}

/// Commands for controlling the emulator
#[derive(Debug, Clone)]
pub enum EmulatorCommand {
    CorruptNextCrc,
    SkipSequence(u32),
    /// Write raw bytes between two packets
    InjectGarbage(Vec<u8>),
    SetPattern(SignalPattern),
    /// Drop the current client, keep listening
    Disconnect,
    Shutdown,
}

enum Served {
    Disconnected,
    Shutdown,
}

pub struct DeviceEmulator {
    config: EmulatorConfig,
    listener: TcpListener,
    simulator: EegSimulator,
    encoder: PacketEncoder,
    control_receiver: mpsc::Receiver<EmulatorCommand>,
    control_sender: mpsc::Sender<EmulatorCommand>,
    device_commands: broadcast::Sender<DeviceCommand>,
    pending_garbage: Vec<u8>,
}

impl DeviceEmulator {
    pub async fn bind(addr: impl ToSocketAddrs, config: EmulatorConfig) -> SimulationResult<Self> {
        let simulator = EegSimulator::new(config.simulator.clone())?;
        let encoder = PacketEncoder::new(config.profile(), config.layout)?;
        let listener = TcpListener::bind(addr).await?;
        let (control_sender, control_receiver) = mpsc::channel(32);
        let (device_commands, _) = broadcast::channel(16);

        Ok(Self {
            config,
            listener,
            simulator,
            encoder,
            control_receiver,
            control_sender,
            device_commands,
            pending_garbage: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SimulationResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn control_handle(&self) -> mpsc::Sender<EmulatorCommand> {
        self.control_sender.clone()
    }

    /// Control frames received from clients
    pub fn subscribe_device_commands(&self) -> broadcast::Receiver<DeviceCommand> {
        self.device_commands.subscribe()
    }

    /// Accept clients one after another until shut down
    pub async fn run(mut self) -> SimulationResult<()> {
        info!(addr = ?self.listener.local_addr().ok(), "device emulator listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!(%peer, "emulator client connected");
                    match self.serve(stream).await {
                        Served::Disconnected => info!(%peer, "emulator client gone"),
                        Served::Shutdown => break,
                    }
                }
                command = self.control_receiver.recv() => {
                    match command {
                        Some(EmulatorCommand::Shutdown) | None => break,
                        Some(command) => self.apply(command),
                    }
                }
            }
        }
        info!("device emulator stopped");
        Ok(())
    }

    async fn serve(&mut self, mut stream: TcpStream) -> Served {
        let period = if self.config.realtime {
            self.config.packet_interval()
        } else {
            Duration::from_micros(1)
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut sent: u64 = 0;
        let (mut reader, mut writer) = stream.split();
        let mut parser = CommandParser::new();
        let mut inbound = [0u8; 64];
        let mut client_writing = true;
        let mut streaming = !self.config.await_start;

        loop {
            tokio::select! {
                _ = ticker.tick(), if streaming => {
                    if self.config.packet_limit.is_some_and(|limit| sent >= limit) {
                        let _ = writer.shutdown().await;
                        return Served::Disconnected;
                    }
                    let chunk = self.simulator.generate(self.config.frames_per_packet);
                    let mut bytes = std::mem::take(&mut self.pending_garbage);
                    match self.encoder.encode(&chunk) {
                        Ok(packet) => bytes.extend_from_slice(&packet),
                        Err(e) => {
                            warn!(error = %e, "emulator could not encode packet");
                            continue;
                        }
                    }
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!(error = %e, "emulator write failed");
                        return Served::Disconnected;
                    }
                    sent += 1;
                }
                read = reader.read(&mut inbound), if client_writing => {
                    match read {
                        Ok(0) => client_writing = false,
                        Ok(n) => {
                            for command in parser.push(&inbound[..n]) {
                                info!(?command, "emulator received device command");
                                if command == DeviceCommand::Start && !streaming {
                                    streaming = true;
                                    ticker.reset_immediately();
                                }
                                let _ = self.device_commands.send(command);
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "emulator read failed");
                            return Served::Disconnected;
                        }
                    }
                }
                command = self.control_receiver.recv() => {
                    match command {
                        Some(EmulatorCommand::Shutdown) | None => {
                            let _ = writer.shutdown().await;
                            return Served::Shutdown;
                        }
                        Some(EmulatorCommand::Disconnect) => {
                            let _ = writer.shutdown().await;
                            return Served::Disconnected;
                        }
                        Some(command) => self.apply(command),
                    }
                }
            }
        }
    }

    fn apply(&mut self, command: EmulatorCommand) {
        debug!(?command, "emulator command");
        match command {
            EmulatorCommand::CorruptNextCrc => self.encoder.corrupt_next_crc(),
            EmulatorCommand::SkipSequence(n) => self.encoder.skip_sequence(n),
            EmulatorCommand::InjectGarbage(bytes) => self.pending_garbage.extend(bytes),
            EmulatorCommand::SetPattern(pattern) => self.simulator.set_pattern(pattern),
            EmulatorCommand::Disconnect | EmulatorCommand::Shutdown => {}
        }
    }
}

/// Handles to a spawned [`DeviceEmulator`]
pub struct EmulatorHandle {
    pub addr: SocketAddr,
    pub control: mpsc::Sender<EmulatorCommand>,
    device_commands: broadcast::Sender<DeviceCommand>,
    task: JoinHandle<SimulationResult<()>>,
}

impl EmulatorHandle {
    pub fn subscribe_device_commands(&self) -> broadcast::Receiver<DeviceCommand> {
        self.device_commands.subscribe()
    }

    pub async fn send(&self, command: EmulatorCommand) {
        let _ = self.control.send(command).await;
    }

    pub async fn shutdown(self) -> SimulationResult<()> {
        let _ = self.control.send(EmulatorCommand::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "emulator task ended abnormally");
                Ok(())
            }
        }
    }
}

/// Bind and run an emulator in the background
pub async fn start_device_emulator(
    addr: impl ToSocketAddrs,
    config: EmulatorConfig,
) -> SimulationResult<EmulatorHandle> {
    let emulator = DeviceEmulator::bind(addr, config).await?;
    let addr = emulator.local_addr()?;
    let control = emulator.control_handle();
    let device_commands = emulator.device_commands.clone();
    let task = tokio::spawn(emulator.run());
    Ok(EmulatorHandle {
        addr,
        control,
        device_commands,
        task,
    })
}
