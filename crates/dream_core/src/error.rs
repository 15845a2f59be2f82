//! Error type shared by every dream_core operation.

use thiserror::Error;

/// Unified error type for synthesis, pyramid and gradient routines.
///
/// Numeric degeneracy (zero-variance gradients, silent bands) is never an
/// error; those cases are guarded with small epsilons instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DreamError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("invalid objective: {0}")]
    InvalidObjective(String),
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),
    #[error("channel {channel} out of range for layer '{layer}' ({channels} channels)")]
    ChannelOutOfRange {
        layer: String,
        channel: usize,
        channels: usize,
    },
    #[error("gradient provider failed: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, DreamError>;
