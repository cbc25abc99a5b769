//! EEG-Processing: streaming filters, spectrum, artifact removal and guided sessions
//!
//! Real-time processing of decoded sample chunks: notch and band filtering,
//! FFT band powers, ICA-style artifact removal, recording with markers, a
//! guided acquisition sequencer and the EOG classifier window.

pub mod artifact;
pub mod config;
pub mod eog;
pub mod error;
pub mod filters;
pub mod guided;
pub mod processor;
pub mod recording;
pub mod ring;
pub mod service;
pub mod spectrum;

pub use artifact::{
    ArtifactModel, ArtifactRemover, ArtifactTrainer, CleanOutcome, PassReason, TrainedModel,
};
pub use config::{FilterResetPolicy, FilterSettings, ProcessorSettings};
pub use eog::{
    ClassifierWindow, EogDetector, EogWindowBuilder, GateDecision, Gesture, GestureClassifier,
    PredictionGate,
};
pub use error::{ProcessingError, ProcessingResult};
pub use filters::{Biquad, FilterChain, SosFilter};
pub use guided::{
    spawn_guided_session, GuidedAction, GuidedSequencer, GuidedSessionHandle, SequencerEvent,
    SequencerTimings, TrialPlan,
};
pub use processor::{ChunkAdmission, SpectrumReport, StreamingProcessor, Throughput};
pub use recording::RecordingSession;
pub use ring::{DisplayBuffer, SampleRing};
pub use service::{
    start_processing_service, ProcessingHandle, ProcessingService, ProcessingStats,
    ProcessorCommand, ProcessorEvent,
};
pub use spectrum::{BandPowers, EegBand, Spectrum, SpectrumAnalyzer};
