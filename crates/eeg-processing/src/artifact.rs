//! Online artifact removal with a precomputed linear unmixing/mixing model
//!
//! The model is produced by an external trainer from a calibration
//! recording. Once installed it is immutable; retraining swaps the whole
//! model. Failures while cleaning disable removal for the rest of the
//! session and hand the input back untouched.

use crate::error::{ProcessingError, ProcessingResult};
use eeg_core::{ArtifactRoles, SampleChunk};
use ndarray::{Array2, Axis};
use std::sync::Arc;
use tracing::{info, warn};

/// Unmixing/mixing pair with a component keep mask
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactModel {
    /// `[components x signal_channels]`
    unmixing: Array2<f32>,
    /// `[signal_channels x components]`
    mixing: Array2<f32>,
    /// `true` keeps the component, `false` zeroes it
    keep: Vec<bool>,
    roles: ArtifactRoles,
}

impl ArtifactModel {
    pub fn new(
        unmixing: Array2<f32>,
        mixing: Array2<f32>,
        keep: Vec<bool>,
        roles: ArtifactRoles,
    ) -> ProcessingResult<Self> {
        let (components, signal_channels) = unmixing.dim();
        if signal_channels != roles.signal().len() {
            return Err(ProcessingError::artifact(format!(
                "unmixing matrix has {} columns for {} signal channels",
                signal_channels,
                roles.signal().len()
            )));
        }
        if mixing.dim() != (signal_channels, components) {
            return Err(ProcessingError::artifact(format!(
                "mixing matrix is {:?}, expected ({}, {})",
                mixing.dim(),
                signal_channels,
                components
            )));
        }
        if keep.len() != components {
            return Err(ProcessingError::artifact(format!(
                "keep mask has {} entries for {} components",
                keep.len(),
                components
            )));
        }
        Ok(Self {
            unmixing,
            mixing,
            keep,
            roles,
        })
    }

    /// Build the keep mask as the complement of the flagged artifact components
    pub fn with_artifacts(
        unmixing: Array2<f32>,
        mixing: Array2<f32>,
        artifact_components: &[usize],
        roles: ArtifactRoles,
    ) -> ProcessingResult<Self> {
        let components = unmixing.nrows();
        if let Some(&bad) = artifact_components.iter().find(|&&c| c >= components) {
            return Err(ProcessingError::artifact(format!(
                "artifact component {} out of range for {} components",
                bad, components
            )));
        }
        let keep = (0..components)
            .map(|c| !artifact_components.contains(&c))
            .collect();
        Self::new(unmixing, mixing, keep, roles)
    }

    pub fn components(&self) -> usize {
        self.unmixing.nrows()
    }

    pub fn channel_count(&self) -> usize {
        self.roles.channel_count()
    }

    pub fn roles(&self) -> &ArtifactRoles {
        &self.roles
    }

    pub fn keep_mask(&self) -> &[bool] {
        &self.keep
    }

    /// Project signal rows to components, drop artifacts, project back
    ///
    /// Reference rows are copied through unmodified.
    pub fn apply(&self, chunk: &SampleChunk) -> ProcessingResult<SampleChunk> {
        if chunk.channels() != self.channel_count() {
            return Err(ProcessingError::artifact(format!(
                "chunk has {} channels, model expects {}",
                chunk.channels(),
                self.channel_count()
            )));
        }

        let signal = chunk.data().select(Axis(0), self.roles.signal());
        let mut sources = self.unmixing.dot(&signal);
        for (mut row, &keep) in sources.rows_mut().into_iter().zip(self.keep.iter()) {
            if !keep {
                row.fill(0.0);
            }
        }
        let cleaned = self.mixing.dot(&sources);

        let mut output = chunk.clone();
        for (row_idx, &channel) in self.roles.signal().iter().enumerate() {
            output
                .data_mut()
                .row_mut(channel)
                .assign(&cleaned.row(row_idx));
        }
        Ok(output)
    }
}

/// Why a chunk left the remover unmodified
#[derive(Debug, Clone, PartialEq)]
pub enum PassReason {
    NoModel,
    Disabled,
    /// Cleaning failed; removal is now disabled
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CleanOutcome {
    Cleaned(SampleChunk),
    PassThrough { chunk: SampleChunk, reason: PassReason },
}

impl CleanOutcome {
    pub fn into_chunk(self) -> SampleChunk {
        match self {
            CleanOutcome::Cleaned(chunk) => chunk,
            CleanOutcome::PassThrough { chunk, .. } => chunk,
        }
    }
}

/// Holds the installed model and the enable flag
#[derive(Debug, Clone, Default)]
pub struct ArtifactRemover {
    model: Option<Arc<ArtifactModel>>,
    enabled: bool,
}

impl ArtifactRemover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new model and enable removal
    pub fn install(&mut self, model: ArtifactModel) {
        info!(
            components = model.components(),
            removed = model.keep_mask().iter().filter(|k| !**k).count(),
            "artifact model installed"
        );
        self.model = Some(Arc::new(model));
        self.enabled = true;
    }

    pub fn clear(&mut self) {
        self.model = None;
        self.enabled = false;
    }

    pub fn model(&self) -> Option<&ArtifactModel> {
        self.model.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.model.is_some()
    }

    /// Toggle removal; enabling without a model is refused
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if enabled && self.model.is_none() {
            info!("cannot enable artifact removal: no model installed");
            self.enabled = false;
            return false;
        }
        self.enabled = enabled;
        info!(enabled, "artifact removal toggled");
        true
    }

    pub fn clean(&mut self, chunk: SampleChunk) -> CleanOutcome {
        let Some(model) = self.model.as_ref() else {
            return CleanOutcome::PassThrough {
                chunk,
                reason: PassReason::NoModel,
            };
        };
        if !self.enabled {
            return CleanOutcome::PassThrough {
                chunk,
                reason: PassReason::Disabled,
            };
        }
        match model.apply(&chunk) {
            Ok(cleaned) => CleanOutcome::Cleaned(cleaned),
            Err(e) => {
                warn!(error = %e, "artifact removal failed, disabling");
                self.enabled = false;
                CleanOutcome::PassThrough {
                    chunk,
                    reason: PassReason::Failed(e.to_string()),
                }
            }
        }
    }
}

/// Output of an external artifact trainer
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub unmixing: Array2<f32>,
    pub mixing: Array2<f32>,
    pub roles: ArtifactRoles,
    /// Components the trainer suggests removing
    pub artifact_components: Vec<usize>,
}

impl TrainedModel {
    pub fn into_model(self) -> ProcessingResult<ArtifactModel> {
        ArtifactModel::with_artifacts(self.unmixing, self.mixing, &self.artifact_components, self.roles)
    }
}

/// Offline training collaborator, invoked with the calibration recording
///
/// Implementations may block; the processing service runs them on a
/// blocking worker.
pub trait ArtifactTrainer: Send + Sync {
    fn train(
        &self,
        data: &SampleChunk,
        sample_rate: f32,
        channel_names: &[String],
    ) -> Result<TrainedModel, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn rotation() -> (Array2<f32>, Array2<f32>) {
        let (s, c) = (0.6f32, 0.8f32);
        let unmixing = array![[c, -s], [s, c]];
        let mixing = unmixing.t().to_owned();
        (unmixing, mixing)
    }

    fn chunk() -> SampleChunk {
        SampleChunk::new(array![
            [100.0, -50.0, 25.0, 0.0],
            [1.0, 2.0, 3.0, 4.0],
            [-1.0, -2.0, -3.0, -4.0]
        ])
    }

    #[test]
    fn test_no_model_passes_through() {
        let mut remover = ArtifactRemover::new();
        let input = chunk();
        match remover.clean(input.clone()) {
            CleanOutcome::PassThrough { chunk, reason } => {
                assert_eq!(chunk, input);
                assert_eq!(reason, PassReason::NoModel);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_all_keep_mask_is_identity() {
        let (unmixing, mixing) = rotation();
        let roles = ArtifactRoles::leading_reference(3, 1).unwrap();
        let model = ArtifactModel::with_artifacts(unmixing, mixing, &[], roles).unwrap();
        let mut remover = ArtifactRemover::new();
        remover.install(model);

        let input = chunk();
        let CleanOutcome::Cleaned(output) = remover.clean(input.clone()) else {
            panic!("expected cleaned output");
        };
        for (a, b) in output.data().iter().zip(input.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_removed_component_and_reference_copy() {
        let unmixing = Array2::<f32>::eye(2);
        let mixing = Array2::<f32>::eye(2);
        let roles = ArtifactRoles::leading_reference(3, 1).unwrap();
        let model = ArtifactModel::with_artifacts(unmixing, mixing, &[1], roles).unwrap();

        let output = model.apply(&chunk()).unwrap();
        assert_eq!(output.row(0).to_vec(), vec![100.0, -50.0, 25.0, 0.0]);
        assert_eq!(output.row(1).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(output.row(2).to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_failure_disables_removal() {
        let (unmixing, mixing) = rotation();
        let roles = ArtifactRoles::leading_reference(3, 1).unwrap();
        let mut remover = ArtifactRemover::new();
        remover.install(ArtifactModel::with_artifacts(unmixing, mixing, &[], roles).unwrap());

        let wrong = SampleChunk::zeros(4, 10);
        let outcome = remover.clean(wrong.clone());
        assert!(matches!(
            outcome,
            CleanOutcome::PassThrough { reason: PassReason::Failed(_), .. }
        ));
        assert_eq!(outcome.into_chunk(), wrong);
        assert!(!remover.is_enabled());

        // Subsequent chunks pass through even with the right shape
        assert!(matches!(
            remover.clean(chunk()),
            CleanOutcome::PassThrough { reason: PassReason::Disabled, .. }
        ));
    }

    #[test]
    fn test_enable_without_model_refused() {
        let mut remover = ArtifactRemover::new();
        assert!(!remover.set_enabled(true));
        assert!(!remover.is_enabled());
    }

    #[test]
    fn test_model_shape_validation() {
        let roles = ArtifactRoles::leading_reference(3, 1).unwrap();
        let bad_mixing = Array2::<f32>::zeros((3, 2));
        assert!(ArtifactModel::new(Array2::eye(2), bad_mixing, vec![true; 2], roles.clone()).is_err());
        assert!(ArtifactModel::with_artifacts(Array2::eye(2), Array2::eye(2), &[5], roles).is_err());
    }
}
