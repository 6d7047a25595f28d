//! Build errors.

use kiln_format::{ArtifactError, ContainerError, KeyValueError, RecordError};

use crate::builder::WriteState;

/// Errors that abort a build.
///
/// The first error moves the builder to [`WriteState::Failed`]; no phase
/// runs after it.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Malformed container, compiled record or patch target.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// An offset left the 32-bit range or a dedup store hit its cap.
    #[error("limit exceeded: {0}")]
    LimitsExceeded(String),

    /// The relative patcher cannot encode a patch at its final distance.
    #[error("patcher failure: {0}")]
    PatcherFailure(String),

    #[error("phase called out of order: expected {expected}, builder is in {actual}")]
    StateMisuse {
        expected: WriteState,
        actual: WriteState,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A reserved offset did not match the write position.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl WriteError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Self::InputInvalid(msg.into())
    }

    pub(crate) fn limits(msg: impl Into<String>) -> Self {
        Self::LimitsExceeded(msg.into())
    }

    pub(crate) fn patcher(msg: impl Into<String>) -> Self {
        Self::PatcherFailure(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InternalInvariant(msg.into())
    }

    /// Error for an offset computation that overflowed `u32`.
    pub(crate) fn overflow(what: &str) -> Self {
        Self::LimitsExceeded(format!("{what} exceeds the 32-bit offset range"))
    }
}

impl From<ContainerError> for WriteError {
    fn from(e: ContainerError) -> Self {
        Self::InputInvalid(e.to_string())
    }
}

impl From<RecordError> for WriteError {
    fn from(e: RecordError) -> Self {
        Self::InputInvalid(e.to_string())
    }
}

impl From<ArtifactError> for WriteError {
    fn from(e: ArtifactError) -> Self {
        Self::InputInvalid(e.to_string())
    }
}

impl From<KeyValueError> for WriteError {
    fn from(e: KeyValueError) -> Self {
        match e {
            KeyValueError::ValueTooLong { .. } => Self::LimitsExceeded(e.to_string()),
            _ => Self::InputInvalid(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, WriteError>;
