//! Recording session: receiver -> processing service -> JSON file

use crate::cli::{Cli, TransportArg};
use crate::config::RecorderConfig;
use crate::store::JsonRecordingStore;
use anyhow::{bail, Context, Result};
use eeg_acquisition::{
    discover, ConnectionStatus, ReceiverEvent, ReceiverTask, SerialTransport, Transport, WifiConfig,
    WifiTransport,
};
use eeg_core::{DeviceProfile, RecordingPayload, RecordingStore};
use eeg_processing::{
    spawn_guided_session, start_processing_service, GuidedSessionHandle, ProcessingHandle, ProcessorCommand,
    ProcessorEvent, SequencerEvent, TrialPlan,
};
use eeg_simulation::{start_device_emulator, EegSimulatorConfig, EmulatorConfig, EmulatorHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Interrupted,
    DurationElapsed,
    GuidedFinished,
    Disconnected,
}

pub struct RecorderApp {
    config: RecorderConfig,
    transport: TransportArg,
    discover: bool,
    duration: Option<Duration>,
    guided: bool,
    output: Option<PathBuf>,
}

impl RecorderApp {
    pub fn new(config: RecorderConfig, cli: &Cli) -> Result<Self> {
        let duration = match cli.duration {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => bail!("--duration must be a positive number of seconds, got {}", secs),
            None => None,
        };
        Ok(Self {
            config,
            transport: cli.transport,
            discover: cli.discover,
            duration,
            guided: cli.guided,
            output: cli.output.clone(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let (transport, emulator) = self.build_transport().await?;
        let profile = self.profile();

        let receiver = ReceiverTask::new(transport, profile.clone()).context("creating receiver")?;
        let chunks = receiver.subscribe_chunks();
        let mut receiver_events = receiver.subscribe_events();

        let processing = start_processing_service(
            chunks,
            self.config.processing.clone(),
            profile.channel_count,
            profile.sample_rate,
            None,
        )
        .context("starting processing service")?;
        let mut processing_events = processing.events.resubscribe();
        let receiver = receiver.spawn();

        processing.send(ProcessorCommand::Start).await?;
        let mut guided = if self.guided {
            Some(self.start_guided(&processing))
        } else {
            processing.send(ProcessorCommand::StartRecording).await?;
            None
        };
        let mut guided_events = guided.as_ref().map(GuidedSessionHandle::subscribe);

        let mut finished: Option<Arc<RecordingPayload>> = None;
        let deadline = self.duration.map(|d| Instant::now() + d);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let reason = loop {
            tokio::select! {
                _ = &mut ctrl_c => break StopReason::Interrupted,
                _ = wait_until(deadline) => break StopReason::DurationElapsed,
                event = receiver_events.recv() => match event {
                    Ok(ReceiverEvent::Status(ConnectionStatus::Disconnected))
                    | Err(broadcast::error::RecvError::Closed) => {
                        let _ = processing.send(ProcessorCommand::ResetCounters).await;
                        break StopReason::Disconnected;
                    }
                    Ok(ReceiverEvent::Status(status)) => info!(%status, "device"),
                    Ok(ReceiverEvent::PacketLoss { missing, .. }) => debug!(missing, "packets lost"),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => debug!(n, "receiver events lagged"),
                },
                event = next_guided(&mut guided_events) => match event {
                    Some(SequencerEvent::Instruction { trial, text, .. }) => info!(trial, %text, "prompt"),
                    Some(SequencerEvent::Countdown(n)) => info!("{}...", n),
                    Some(SequencerEvent::Finished { aborted }) => {
                        info!(aborted, "guided session finished");
                        break StopReason::GuidedFinished;
                    }
                    Some(_) => {}
                    None => guided_events = None,
                },
                event = processing_events.recv() => {
                    if let Ok(event) = event {
                        observe(event, &mut finished);
                    }
                }
            }
        };
        info!(?reason, "stopping recorder");

        // The session's stop-recording and the shutdown share one FIFO
        // command queue, so its closing markers are never lost
        if let Some(session) = guided.take() {
            session.stop().await;
        }
        let forced = processing.shutdown().await.context("stopping processing service")?;
        if let Err(e) = receiver.stop().await {
            warn!(error = %e, "receiver ended with an error");
        }
        while let Ok(event) = processing_events.try_recv() {
            observe(event, &mut finished);
        }
        if let Some(emulator) = emulator {
            emulator.shutdown().await.context("stopping emulator")?;
        }

        let payload = forced.map(Arc::new).or(finished);
        match payload {
            Some(payload) => {
                let store = match &self.output {
                    Some(path) => JsonRecordingStore::new(path),
                    None => JsonRecordingStore::timestamped(&self.config.output_dir, chrono::Local::now()),
                };
                store
                    .save(&payload)
                    .with_context(|| format!("saving recording to {}", store.path().display()))?;
                info!(seconds = payload.duration_secs(), path = %store.path().display(), "recording written");
            }
            None => info!("nothing was recorded"),
        }
        Ok(())
    }

    fn profile(&self) -> DeviceProfile {
        match self.transport {
            TransportArg::Ble => DeviceProfile {
                frames_per_packet: DeviceProfile::ble().frames_per_packet,
                ..self.config.device.clone()
            },
            _ => self.config.device.clone(),
        }
    }

    async fn build_transport(&self) -> Result<(Box<dyn Transport>, Option<EmulatorHandle>)> {
        match self.transport {
            TransportArg::Wifi => {
                let mut wifi = self.config.wifi.clone();
                if self.discover {
                    let device = discover(&self.config.discovery).await.context("device discovery")?;
                    info!(ip = %device.ip(), "using discovered device");
                    wifi.host = device.ip().to_string();
                }
                Ok((Box::new(WifiTransport::new(wifi)), None))
            }
            TransportArg::Serial => Ok((Box::new(SerialTransport::new(self.config.serial.clone())), None)),
            TransportArg::Ble => ble_transport(&self.config),
            TransportArg::Sim => {
                let device = &self.config.device;
                let emulator = start_device_emulator(
                    "127.0.0.1:0",
                    EmulatorConfig {
                        simulator: EegSimulatorConfig {
                            channel_count: device.channel_count,
                            sample_rate: device.sample_rate,
                            ..EegSimulatorConfig::default()
                        },
                        v_ref: device.v_ref,
                        gain: device.gain,
                        frames_per_packet: device.frames_per_packet,
                        ..EmulatorConfig::default()
                    },
                )
                .await
                .context("starting device emulator")?;
                info!(addr = %emulator.addr, "streaming from emulated device");
                let wifi = WifiConfig {
                    host: emulator.addr.ip().to_string(),
                    port: emulator.addr.port(),
                    ..self.config.wifi.clone()
                };
                Ok((Box::new(WifiTransport::new(wifi)), Some(emulator)))
            }
        }
    }

    fn start_guided(&self, processing: &ProcessingHandle) -> GuidedSessionHandle {
        let timings = self.config.guided.timings.clone();
        let plan = match self.config.guided.seed {
            Some(seed) => TrialPlan::seeded(timings.trial_count, seed),
            None => TrialPlan::randomized(timings.trial_count, &mut rand::thread_rng()),
        };
        info!(trials = plan.len(), "starting guided session");
        spawn_guided_session(plan, timings, processing.commands.clone())
    }
}

#[cfg(feature = "ble")]
fn ble_transport(config: &RecorderConfig) -> Result<(Box<dyn Transport>, Option<EmulatorHandle>)> {
    if config.ble.address.is_empty() {
        bail!("--ble-address is required for the ble transport");
    }
    Ok((Box::new(eeg_acquisition::BleTransport::new(config.ble.clone())), None))
}

#[cfg(not(feature = "ble"))]
fn ble_transport(_config: &RecorderConfig) -> Result<(Box<dyn Transport>, Option<EmulatorHandle>)> {
    bail!("this build has no bluetooth support; rebuild with `--features ble`")
}

fn observe(event: ProcessorEvent, finished: &mut Option<Arc<RecordingPayload>>) {
    match event {
        ProcessorEvent::Spectrum(report) => {
            let bands = &report.spectrum.band_powers;
            debug!(
                alpha = bands.alpha,
                beta = bands.beta,
                packets = report.throughput.packets,
                bytes = report.throughput.bytes,
                "spectrum"
            );
        }
        ProcessorEvent::ChunkDropped { expected, actual } => {
            warn!(expected, actual, "chunk with wrong channel count dropped")
        }
        ProcessorEvent::MarkerAdded(marker) => debug!(label = %marker.label, index = marker.sample_index, "marker"),
        ProcessorEvent::RecordingFinished(Some(payload)) => *finished = Some(payload),
        ProcessorEvent::TrainingFailed(message) => warn!(%message, "artifact training failed"),
        _ => {}
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_guided(events: &mut Option<broadcast::Receiver<SequencerEvent>>) -> Option<SequencerEvent> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
