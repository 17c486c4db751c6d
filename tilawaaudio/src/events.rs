//! Broadcast bus for async observers of the coordinator.
//!
//! Carries the same notifications as the callback listeners, plus the raw
//! state machine transitions and failures.

use tokio::sync::broadcast;

use crate::coordinator::PlaybackState;
use crate::{PlaybackError, SourceId};

const DEFAULT_CAPACITY: usize = 256;

/// Notification published by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Same payload as a state listener call.
    StateChanged { source: SourceId, is_playing: bool },
    /// Same payload as a completion listener call.
    Completed { source: SourceId },
    /// The state machine moved from `from` to `to`.
    Transition {
        source: Option<SourceId>,
        from: PlaybackState,
        to: PlaybackState,
    },
    /// A playback attempt failed.
    Failed {
        source: SourceId,
        error: PlaybackError,
    },
}

#[derive(Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: PlaybackEvent) {
        // No subscriber is not an error
        let _ = self.tx.send(event);
    }
}
