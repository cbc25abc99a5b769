//! Channel-role mappings
//!
//! Roles are resolved once, when the channel layout is configured. Lookups
//! that fail produce [`EegError::UnresolvedChannelRole`] instead of silently
//! disabling the feature that needed them.

use crate::error::{EegError, EegResult};
use serde::{Deserialize, Serialize};

/// Indices of the four electro-oculogram electrodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EogChannelMap {
    pub up: usize,
    pub down: usize,
    pub left: usize,
    pub right: usize,
}

impl EogChannelMap {
    /// Resolve roles by case-insensitive substring match on channel names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> EegResult<Self> {
        let find = |role: &'static str| -> EegResult<usize> {
            names
                .iter()
                .position(|n| n.as_ref().to_lowercase().contains(role))
                .ok_or_else(|| EegError::UnresolvedChannelRole {
                    role,
                    available: names.iter().map(|n| n.as_ref().to_string()).collect(),
                })
        };

        Ok(Self {
            up: find("up")?,
            down: find("down")?,
            left: find("left")?,
            right: find("right")?,
        })
    }

    /// Explicit indices, checked against the channel count
    pub fn new(up: usize, down: usize, left: usize, right: usize, channels: usize) -> EegResult<Self> {
        let map = Self { up, down, left, right };
        if let Some(bad) = map.indices().into_iter().find(|&i| i >= channels) {
            return Err(EegError::config(format!(
                "EOG channel index {} out of range for {} channels",
                bad, channels
            )));
        }
        Ok(map)
    }

    pub fn indices(&self) -> [usize; 4] {
        [self.up, self.down, self.left, self.right]
    }
}

/// Partition of channels into cleaned "signal" rows and pass-through "reference" rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawArtifactRoles")]
pub struct ArtifactRoles {
    signal: Vec<usize>,
    reference: Vec<usize>,
}

/// Unchecked wire form; deserialization goes through [`ArtifactRoles::new`]
#[derive(Deserialize)]
struct RawArtifactRoles {
    signal: Vec<usize>,
    reference: Vec<usize>,
}

impl TryFrom<RawArtifactRoles> for ArtifactRoles {
    type Error = EegError;

    fn try_from(raw: RawArtifactRoles) -> EegResult<Self> {
        let channels = raw.signal.len() + raw.reference.len();
        Self::new(channels, raw.signal, raw.reference)
    }
}

impl ArtifactRoles {
    /// Build from explicit index sets; together they must cover `0..channels` exactly once
    pub fn new(channels: usize, signal: Vec<usize>, reference: Vec<usize>) -> EegResult<Self> {
        let mut seen = vec![false; channels];
        for &idx in signal.iter().chain(reference.iter()) {
            match seen.get_mut(idx) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(EegError::config(format!("channel {} assigned to two roles", idx)))
                }
                None => {
                    return Err(EegError::config(format!(
                        "channel {} out of range for {} channels",
                        idx, channels
                    )))
                }
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(EegError::config(format!("channel {} has no role", missing)));
        }
        if signal.is_empty() {
            return Err(EegError::config("no signal channels to clean"));
        }
        Ok(Self { signal, reference })
    }

    /// The first `reference_count` channels are references, the rest are signal
    pub fn leading_reference(channels: usize, reference_count: usize) -> EegResult<Self> {
        if channels <= reference_count {
            return Err(EegError::config(format!(
                "at least {} channels required ({} reference + signal), got {}",
                reference_count + 1,
                reference_count,
                channels
            )));
        }
        Self::new(
            channels,
            (reference_count..channels).collect(),
            (0..reference_count).collect(),
        )
    }

    pub fn signal(&self) -> &[usize] {
        &self.signal
    }

    pub fn reference(&self) -> &[usize] {
        &self.reference
    }

    pub fn channel_count(&self) -> usize {
        self.signal.len() + self.reference.len()
    }
}
