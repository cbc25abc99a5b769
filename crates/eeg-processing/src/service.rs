//! Async processing service wrapping a [`StreamingProcessor`]
//!
//! Chunks arrive on a broadcast channel from a receiver task; control goes
//! through an mpsc command channel; results leave on a broadcast channel.
//! All processor mutation happens on the service task, so reconfiguration,
//! model installation and recording control never race with a tick.

use crate::artifact::ArtifactTrainer;
use crate::config::ProcessorSettings;
use crate::error::{ProcessingError, ProcessingResult};
use crate::processor::{ChunkAdmission, SpectrumReport, StreamingProcessor};
use eeg_core::{Marker, RecordingPayload, SampleChunk};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commands for controlling processing
///
/// Every command except `Start` first admits the chunks already waiting on
/// the input channel, so it applies after the data sent before it.
#[derive(Debug)]
pub enum ProcessorCommand {
    /// Begin admitting chunks and running the timers
    Start,
    /// Stop the timers; an active recording is finalized
    Stop,
    StartRecording,
    StopRecording,
    AddMarker(String),
    StartCalibration(Duration),
    SetArtifactRemoval(bool),
    SetChannelCount(usize),
    SetSampleRate(f32),
    SetFilterBand { high_pass: f64, low_pass: f64 },
    SetNotch { enabled: bool, freq: f64 },
    SetChannelNames(Vec<String>),
    RenameChannel { index: usize, name: String },
    /// Zero the throughput counters, e.g. after a disconnect
    ResetCounters,
    /// Reply with the decimated display window, oldest to newest
    DisplaySnapshot(oneshot::Sender<Array2<f32>>),
    Shutdown,
}

/// Outputs for display, persistence and calibration consumers
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    /// Final (filtered, optionally cleaned) samples of one tick
    Filtered(SampleChunk),
    Spectrum(Arc<SpectrumReport>),
    ChunkDropped { expected: usize, actual: usize },
    MarkerAdded(Marker),
    RecordingStarted,
    /// `None` when the recording held no samples
    RecordingFinished(Option<Arc<RecordingPayload>>),
    CalibrationStarted { duration: Duration },
    CalibrationReady(Arc<SampleChunk>),
    ModelInstalled,
    TrainingFailed(String),
}

/// Statistics about the running service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub is_running: bool,
    pub chunks_processed: u64,
    pub chunks_dropped: u64,
    pub lagged_chunks: u64,
    pub is_recording: bool,
    pub is_calibrating: bool,
    pub artifact_removal: bool,
}

type TrainingOutcome = Result<crate::artifact::TrainedModel, String>;

pub struct ProcessingService {
    processor: StreamingProcessor,
    trainer: Option<Arc<dyn ArtifactTrainer>>,

    // Communication channels
    input_receiver: broadcast::Receiver<SampleChunk>,
    output_sender: broadcast::Sender<ProcessorEvent>,
    command_receiver: mpsc::Receiver<ProcessorCommand>,
    command_sender: mpsc::Sender<ProcessorCommand>,
    training_sender: mpsc::Sender<TrainingOutcome>,
    training_receiver: mpsc::Receiver<TrainingOutcome>,

    // State management
    running: bool,
    calibration_deadline: Option<Instant>,
    stats: Arc<Mutex<ProcessingStats>>,
}

impl ProcessingService {
    pub fn new(
        input_receiver: broadcast::Receiver<SampleChunk>,
        settings: ProcessorSettings,
        channels: usize,
        sample_rate: f32,
    ) -> ProcessingResult<Self> {
        let processor = StreamingProcessor::new(settings, channels, sample_rate)?;
        let (output_sender, _) = broadcast::channel(50);
        let (command_sender, command_receiver) = mpsc::channel(32);
        let (training_sender, training_receiver) = mpsc::channel(4);

        Ok(Self {
            processor,
            trainer: None,
            input_receiver,
            output_sender,
            command_receiver,
            command_sender,
            training_sender,
            training_receiver,
            running: false,
            calibration_deadline: None,
            stats: Arc::new(Mutex::new(ProcessingStats::default())),
        })
    }

    /// Run this trainer on every finished calibration
    pub fn with_trainer(mut self, trainer: Arc<dyn ArtifactTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.output_sender.subscribe()
    }

    pub fn command_handle(&self) -> mpsc::Sender<ProcessorCommand> {
        self.command_sender.clone()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<ProcessingStats>> {
        self.stats.clone()
    }

    /// Main processing loop
    ///
    /// Returns the payload of a recording that was still active at shutdown.
    pub async fn run(mut self) -> ProcessingResult<Option<RecordingPayload>> {
        info!(
            channels = self.processor.channels(),
            sample_rate = self.processor.sample_rate(),
            "processing service started"
        );

        let mut tick = interval(self.processor.settings().tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut spectrum = interval(self.processor.settings().spectrum_interval());
        spectrum.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut forced = None;

        loop {
            tokio::select! {
                chunk = self.input_receiver.recv() => {
                    match chunk {
                        Ok(chunk) => self.admit(chunk).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "processing lagged behind input");
                            self.update_stats(|s| s.lagged_chunks += skipped).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("input channel closed, stopping processing service");
                            forced = self.halt().await;
                            break;
                        }
                    }
                }

                _ = tick.tick(), if self.running => {
                    if let Some(chunk) = self.processor.tick() {
                        let _ = self.output_sender.send(ProcessorEvent::Filtered(chunk));
                    }
                }

                _ = spectrum.tick(), if self.running => {
                    match self.processor.spectrum_tick() {
                        Ok(report) => {
                            let _ = self.output_sender.send(ProcessorEvent::Spectrum(Arc::new(report)));
                        }
                        Err(e) => warn!(error = %e, "spectrum computation failed"),
                    }
                }

                _ = wait_until(self.calibration_deadline), if self.calibration_deadline.is_some() => {
                    self.calibration_deadline = None;
                    self.finish_calibration().await;
                }

                Some(outcome) = self.training_receiver.recv() => {
                    self.install_trained(outcome).await;
                }

                command = self.command_receiver.recv() => {
                    if !matches!(command, Some(ProcessorCommand::Start)) {
                        self.drain_input().await;
                    }
                    match command {
                        Some(ProcessorCommand::Shutdown) | None => {
                            forced = self.halt().await;
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }
            }
        }

        info!("processing service stopped");
        Ok(forced)
    }

    async fn admit(&mut self, chunk: SampleChunk) {
        if !self.running {
            return;
        }
        match self.processor.enqueue(chunk) {
            ChunkAdmission::Queued => {
                self.update_stats(|s| s.chunks_processed += 1).await;
            }
            ChunkAdmission::Dropped { expected, actual } => {
                let _ = self
                    .output_sender
                    .send(ProcessorEvent::ChunkDropped { expected, actual });
                self.update_stats(|s| s.chunks_dropped += 1).await;
            }
        }
    }

    /// Admit every chunk already buffered on the input channel
    async fn drain_input(&mut self) {
        loop {
            match self.input_receiver.try_recv() {
                Ok(chunk) => self.admit(chunk).await,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "processing lagged behind input");
                    self.update_stats(|s| s.lagged_chunks += skipped).await;
                }
                Err(broadcast::error::TryRecvError::Empty) | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
    }

    async fn handle_command(&mut self, command: ProcessorCommand) {
        debug!(?command, "processing command");
        match command {
            ProcessorCommand::Start => {
                self.processor.reset_stream();
                self.running = true;
                info!("processing started");
            }
            ProcessorCommand::Stop => {
                if let Some(payload) = self.halt().await {
                    // A stop is not a shutdown; hand the recording out as an event
                    let _ = self
                        .output_sender
                        .send(ProcessorEvent::RecordingFinished(Some(Arc::new(payload))));
                }
            }
            ProcessorCommand::StartRecording => {
                self.processor.start_recording();
                let _ = self.output_sender.send(ProcessorEvent::RecordingStarted);
            }
            ProcessorCommand::StopRecording => {
                if self.processor.is_recording() {
                    let payload = self.finalize_recording();
                    let _ = self
                        .output_sender
                        .send(ProcessorEvent::RecordingFinished(payload.map(Arc::new)));
                }
            }
            ProcessorCommand::AddMarker(label) => match self.processor.add_marker(label) {
                Some(marker) => {
                    let _ = self.output_sender.send(ProcessorEvent::MarkerAdded(marker));
                }
                None => debug!("marker ignored, not recording"),
            },
            ProcessorCommand::StartCalibration(duration) => {
                if self.processor.start_calibration() {
                    self.calibration_deadline = Some(Instant::now() + duration);
                    let _ = self
                        .output_sender
                        .send(ProcessorEvent::CalibrationStarted { duration });
                } else {
                    info!("calibration already running, request ignored");
                }
            }
            ProcessorCommand::SetArtifactRemoval(enabled) => {
                self.processor.set_artifact_removal(enabled);
            }
            ProcessorCommand::SetChannelCount(channels) => {
                if let Err(e) = self.processor.set_channel_count(channels) {
                    warn!(error = %e, "channel count rejected");
                }
            }
            ProcessorCommand::SetSampleRate(rate) => {
                if let Err(e) = self.processor.set_sample_rate(rate) {
                    warn!(error = %e, "sample rate rejected");
                }
            }
            ProcessorCommand::SetFilterBand { high_pass, low_pass } => {
                self.processor.set_filter_band(high_pass, low_pass);
            }
            ProcessorCommand::SetNotch { enabled, freq } => {
                self.processor.set_notch(enabled, freq);
            }
            ProcessorCommand::SetChannelNames(names) => {
                self.processor.set_channel_names(names);
            }
            ProcessorCommand::RenameChannel { index, name } => {
                if !self.processor.rename_channel(index, name) {
                    warn!(index, "rename ignored, channel out of range");
                }
            }
            ProcessorCommand::ResetCounters => self.processor.reset_counters(),
            ProcessorCommand::DisplaySnapshot(reply) => {
                let _ = reply.send(self.processor.display_snapshot());
            }
            ProcessorCommand::Shutdown => {}
        }
        self.refresh_stats().await;
    }

    /// Stop timers first, then force-finalize any recording
    async fn halt(&mut self) -> Option<RecordingPayload> {
        self.running = false;
        self.calibration_deadline = None;
        self.processor.finish_calibration();
        let payload = if self.processor.is_recording() {
            self.finalize_recording()
        } else {
            None
        };
        self.refresh_stats().await;
        info!("processing stopped");
        payload
    }

    fn finalize_recording(&mut self) -> Option<RecordingPayload> {
        match self.processor.stop_recording() {
            Ok((flushed, payload)) => {
                if let Some(chunk) = flushed {
                    let _ = self.output_sender.send(ProcessorEvent::Filtered(chunk));
                }
                payload
            }
            Err(e) => {
                error!(error = %e, "recording could not be finalized");
                None
            }
        }
    }

    async fn finish_calibration(&mut self) {
        let Some(data) = self.processor.finish_calibration() else {
            warn!("calibration finished without samples");
            let _ = self
                .output_sender
                .send(ProcessorEvent::TrainingFailed("no calibration samples".to_string()));
            self.refresh_stats().await;
            return;
        };
        let data = Arc::new(data);
        let _ = self
            .output_sender
            .send(ProcessorEvent::CalibrationReady(data.clone()));

        if let Some(trainer) = self.trainer.clone() {
            let sample_rate = self.processor.sample_rate();
            let names = self.processor.channel_names().to_vec();
            let sender = self.training_sender.clone();
            info!(frames = data.frames(), "training artifact model");
            tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || {
                    trainer.train(&data, sample_rate, &names)
                })
                .await
                .unwrap_or_else(|e| Err(format!("trainer panicked: {}", e)));
                let _ = sender.send(outcome).await;
            });
        }
        self.refresh_stats().await;
    }

    async fn install_trained(&mut self, outcome: TrainingOutcome) {
        let installed = outcome
            .map_err(|message| ProcessingError::Training { message })
            .and_then(|trained| trained.into_model())
            .and_then(|model| self.processor.install_model(model));
        match installed {
            Ok(()) => {
                let _ = self.output_sender.send(ProcessorEvent::ModelInstalled);
            }
            Err(e) => {
                warn!(error = %e, "artifact training failed");
                let _ = self
                    .output_sender
                    .send(ProcessorEvent::TrainingFailed(e.to_string()));
            }
        }
        self.refresh_stats().await;
    }

    async fn refresh_stats(&self) {
        let running = self.running;
        let recording = self.processor.is_recording();
        let calibrating = self.processor.is_calibrating();
        let removal = self.processor.remover().is_enabled();
        self.update_stats(|s| {
            s.is_running = running;
            s.is_recording = recording;
            s.is_calibrating = calibrating;
            s.artifact_removal = removal;
        })
        .await;
    }

    async fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut ProcessingStats),
    {
        let mut stats = self.stats.lock().await;
        update_fn(&mut stats);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Handles to a spawned [`ProcessingService`]
pub struct ProcessingHandle {
    pub events: broadcast::Receiver<ProcessorEvent>,
    pub commands: mpsc::Sender<ProcessorCommand>,
    pub stats: Arc<Mutex<ProcessingStats>>,
    task: JoinHandle<ProcessingResult<Option<RecordingPayload>>>,
}

impl ProcessingHandle {
    pub async fn send(&self, command: ProcessorCommand) -> ProcessingResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ProcessingError::ServiceClosed)
    }

    /// Current display window; `None` once the service has stopped
    pub async fn display_snapshot(&self) -> Option<Array2<f32>> {
        let (reply, rx) = oneshot::channel();
        self.send(ProcessorCommand::DisplaySnapshot(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Shut the service down and collect the recording that was still open
    pub async fn shutdown(self) -> ProcessingResult<Option<RecordingPayload>> {
        // The loop also exits once every command sender is gone
        let _ = self.commands.send(ProcessorCommand::Shutdown).await;
        self.task.await.map_err(|_| ProcessingError::ServiceClosed)?
    }
}

/// Start a processing service in the background
pub fn start_processing_service(
    input_receiver: broadcast::Receiver<SampleChunk>,
    settings: ProcessorSettings,
    channels: usize,
    sample_rate: f32,
    trainer: Option<Arc<dyn ArtifactTrainer>>,
) -> ProcessingResult<ProcessingHandle> {
    let mut service = ProcessingService::new(input_receiver, settings, channels, sample_rate)?;
    if let Some(trainer) = trainer {
        service = service.with_trainer(trainer);
    }

    let events = service.subscribe_output();
    let commands = service.command_handle();
    let stats = service.stats_handle();

    let task = tokio::spawn(async move {
        let result = service.run().await;
        if let Err(e) = &result {
            error!(error = %e, "processing service error");
        }
        result
    });

    Ok(ProcessingHandle {
        events,
        commands,
        stats,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::TrainedModel;
    use crate::config::FilterSettings;
    use eeg_core::ArtifactRoles;
    use ndarray::Array2;

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            filters: FilterSettings {
                low_pass: 0.0,
                ..FilterSettings::default()
            },
            ..ProcessorSettings::default()
        }
    }

    async fn next_matching<F>(events: &mut broadcast::Receiver<ProcessorEvent>, mut pred: F) -> ProcessorEvent
    where
        F: FnMut(&ProcessorEvent) -> bool,
    {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    struct ZeroTrainer;

    impl ArtifactTrainer for ZeroTrainer {
        fn train(&self, data: &SampleChunk, _: f32, _: &[String]) -> Result<TrainedModel, String> {
            let roles = ArtifactRoles::leading_reference(data.channels(), 2).map_err(|e| e.to_string())?;
            let n = roles.signal().len();
            Ok(TrainedModel {
                unmixing: Array2::eye(n),
                mixing: Array2::eye(n),
                roles,
                artifact_components: vec![0],
            })
        }
    }

    struct FailingTrainer;

    impl ArtifactTrainer for FailingTrainer {
        fn train(&self, _: &SampleChunk, _: f32, _: &[String]) -> Result<TrainedModel, String> {
            Err("not enough channels".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_output_after_start() {
        let (tx, rx) = broadcast::channel(64);
        let mut handle = start_processing_service(rx, settings(), 2, 250.0, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        tokio::task::yield_now().await;

        tx.send(SampleChunk::zeros(2, 25)).unwrap();
        let event = next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::Filtered(_))).await;
        match event {
            ProcessorEvent::Filtered(chunk) => assert_eq!(chunk.frames(), 25),
            other => panic!("unexpected event {:?}", other),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_chunk_reported() {
        let (tx, rx) = broadcast::channel(64);
        let mut handle = start_processing_service(rx, settings(), 4, 250.0, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        tokio::task::yield_now().await;

        tx.send(SampleChunk::zeros(3, 10)).unwrap();
        let event = next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::ChunkDropped { .. })).await;
        assert!(matches!(event, ProcessorEvent::ChunkDropped { expected: 4, actual: 3 }));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finalizes_open_recording() {
        let (tx, rx) = broadcast::channel(64);
        let handle = start_processing_service(rx, settings(), 2, 250.0, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        handle.send(ProcessorCommand::StartRecording).await.unwrap();
        tokio::task::yield_now().await;

        tx.send(SampleChunk::zeros(2, 40)).unwrap();
        tx.send(SampleChunk::zeros(2, 40)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let payload = handle.shutdown().await.unwrap().unwrap();
        assert_eq!(payload.data.frames(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_recording_emits_flushed_samples() {
        let (tx, rx) = broadcast::channel(64);
        let mut handle = start_processing_service(rx, settings(), 2, 250.0, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        handle.send(ProcessorCommand::StartRecording).await.unwrap();
        tokio::task::yield_now().await;

        tx.send(SampleChunk::zeros(2, 30)).unwrap();
        handle.send(ProcessorCommand::StopRecording).await.unwrap();

        let mut filtered = 0;
        let recorded = loop {
            match handle.events.recv().await.unwrap() {
                ProcessorEvent::Filtered(chunk) => filtered += chunk.frames(),
                ProcessorEvent::RecordingFinished(payload) => break payload.unwrap().data.frames(),
                _ => {}
            }
        };
        assert_eq!(recorded, 30);
        assert_eq!(filtered, 30);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_snapshot_holds_latest_samples() {
        let settings = ProcessorSettings {
            display_samples: 4,
            display_downsample: 1,
            ..settings()
        };
        let (tx, rx) = broadcast::channel(64);
        let mut handle = start_processing_service(rx, settings, 2, 250.0, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        tokio::task::yield_now().await;

        let rows = vec![(1..=6).map(|v| v as f32).collect(), (1..=6).map(|v| -(v as f32)).collect()];
        tx.send(SampleChunk::from_rows(rows).unwrap()).unwrap();
        let chunk = match next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::Filtered(_))).await {
            ProcessorEvent::Filtered(chunk) => chunk,
            other => panic!("unexpected event {:?}", other),
        };

        let snapshot = handle.display_snapshot().await.unwrap();
        assert_eq!(snapshot.dim(), (2, 4));
        assert_eq!(snapshot, chunk.data().slice(ndarray::s![.., 2..]));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_trains_and_installs() {
        let (tx, rx) = broadcast::channel(64);
        let mut handle =
            start_processing_service(rx, settings(), 4, 250.0, Some(Arc::new(ZeroTrainer))).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        handle
            .send(ProcessorCommand::StartCalibration(Duration::from_millis(500)))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        tx.send(SampleChunk::zeros(4, 50)).unwrap();

        let ready = next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::CalibrationReady(_))).await;
        match ready {
            ProcessorEvent::CalibrationReady(data) => assert_eq!(data.frames(), 50),
            other => panic!("unexpected event {:?}", other),
        }
        next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::ModelInstalled)).await;
        assert!(handle.stats.lock().await.artifact_removal);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_training_failure_reported() {
        let (tx, rx) = broadcast::channel(64);
        let mut handle =
            start_processing_service(rx, settings(), 4, 250.0, Some(Arc::new(FailingTrainer))).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        handle
            .send(ProcessorCommand::StartCalibration(Duration::from_millis(300)))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        tx.send(SampleChunk::zeros(4, 30)).unwrap();

        let failed = next_matching(&mut handle.events, |e| matches!(e, ProcessorEvent::TrainingFailed(_))).await;
        match failed {
            ProcessorEvent::TrainingFailed(msg) => assert!(msg.contains("not enough channels")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!handle.stats.lock().await.artifact_removal);
        handle.shutdown().await.unwrap();
    }
}
