//! Error types for tilawaaudio

use crate::SourceId;

/// Coarse classification of a failed playback attempt.
///
/// The coordinator treats every reason the same way; callers use it to
/// decide between retrying, trying another mirror or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NetworkFailure,
    DecodeFailure,
    Aborted,
    InvalidSource,
}

/// Error raised by a single playback attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Playback aborted")]
    Aborted,

    #[error("Invalid audio source: {0:?}")]
    InvalidSource(String),
}

impl PlaybackError {
    pub fn network(message: impl Into<String>) -> Self {
        PlaybackError::NetworkFailure(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        PlaybackError::DecodeFailure(message.into())
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            PlaybackError::NetworkFailure(_) => FailureReason::NetworkFailure,
            PlaybackError::DecodeFailure(_) => FailureReason::DecodeFailure,
            PlaybackError::Aborted => FailureReason::Aborted,
            PlaybackError::InvalidSource(_) => FailureReason::InvalidSource,
        }
    }

    /// True when another candidate URL for the same item may succeed.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            PlaybackError::NetworkFailure(_) | PlaybackError::DecodeFailure(_)
        )
    }
}

/// One failed candidate of a fallback list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub source: SourceId,
    pub error: PlaybackError,
}

/// Errors of the ordered-candidate fallback policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FallbackError {
    #[error("No audio candidates supplied")]
    NoCandidates,

    #[error("Superseded by another playback request while trying {0}")]
    Superseded(SourceId),

    #[error("All {} audio candidates failed", attempts.len())]
    Exhausted { attempts: Vec<FailedAttempt> },
}

/// Result type specialized for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
