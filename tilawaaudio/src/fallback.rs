//! Multi-URL fallback for a single logical audio item.
//!
//! A verse can usually be fetched from several mirrors. [`FallbackPlayer`]
//! asks the coordinator to play each candidate in order and stops at the first
//! one that starts. The coordinator itself never retries.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::coordinator::AudioCoordinator;
use crate::error::{FailedAttempt, FallbackError};
use crate::{PlaybackError, SourceId};

/// Plays the first working candidate among a list of mirrors.
#[derive(Debug, Clone)]
pub struct FallbackPlayer {
    coordinator: AudioCoordinator,
    attempt_timeout: Option<Duration>,
}

impl FallbackPlayer {
    pub fn new(coordinator: AudioCoordinator) -> Self {
        Self {
            coordinator,
            attempt_timeout: None,
        }
    }

    /// Gives up on a candidate that has not started after `timeout` and moves
    /// on to the next one. `None` waits for the pipeline verdict.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Plays `candidates` in order until one starts and returns its id.
    ///
    /// Stops early with [`FallbackError::Superseded`] when the attempt is
    /// aborted by another request on the coordinator: falling back would
    /// then override the user.
    pub async fn play(&self, candidates: &[SourceId]) -> Result<SourceId, FallbackError> {
        if candidates.is_empty() {
            return Err(FallbackError::NoCandidates);
        }

        let mut attempts = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.iter().enumerate() {
            debug!(source = %candidate, attempt = index + 1, "Trying audio candidate");

            match self.attempt(candidate).await {
                Ok(()) => {
                    if index > 0 {
                        debug!(source = %candidate, "Fallback candidate started");
                    }
                    return Ok(candidate.clone());
                }
                Err(PlaybackError::Aborted) => {
                    debug!(source = %candidate, "Fallback superseded by another request");
                    return Err(FallbackError::Superseded(candidate.clone()));
                }
                Err(e) => {
                    warn!(source = %candidate, error = %e, "Audio candidate failed");
                    attempts.push(FailedAttempt {
                        source: candidate.clone(),
                        error: e,
                    });
                }
            }
        }

        error!(attempts = attempts.len(), "All audio candidates failed");
        Err(FallbackError::Exhausted { attempts })
    }

    async fn attempt(&self, candidate: &SourceId) -> Result<(), PlaybackError> {
        let Some(timeout) = self.attempt_timeout else {
            return self.coordinator.play(candidate.clone()).await;
        };

        match tokio::time::timeout(timeout, self.coordinator.play(candidate.clone())).await {
            Ok(result) => result,
            Err(_) => {
                // Release the stalled candidate unless the user already moved on
                if self.coordinator.current_source().as_ref() == Some(candidate) {
                    self.coordinator.stop();
                }
                Err(PlaybackError::network(format!(
                    "no audio after {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}
