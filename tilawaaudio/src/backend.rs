//! Seam between the coordinator and the media pipeline.
//!
//! A backend turns a [`SourceId`] into an [`AudioResource`]. Loading never
//! fails synchronously: the resource reports its lifecycle through the
//! [`EventSink`] it was given (`Started`, `Paused`, `Ended`, `Failed`).
//! Every message carries the generation of the resource that emitted it, so
//! the coordinator can drop events coming from superseded resources.

pub mod stream;

use tokio::sync::mpsc;

use crate::{PlaybackError, SourceId};

/// Lifecycle notification emitted by an [`AudioResource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// Audio is now being produced (first start, or a platform-initiated resume).
    Started,
    /// The pipeline paused on its own (focus loss, backgrounding).
    Paused,
    /// Natural end of the clip.
    Ended,
    /// The clip could not be fetched or decoded.
    Failed(PlaybackError),
}

/// An event tagged with the generation of the resource that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMessage {
    pub generation: u64,
    pub event: ResourceEvent,
}

/// Handle given to a resource to report its lifecycle.
///
/// Emitting never blocks and never calls back into the coordinator, so it is
/// safe to emit from inside [`AudioResource`] methods.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ResourceMessage>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<ResourceMessage>) -> Self {
        Self { generation, tx }
    }

    /// Creates a detached sink and the receiving end of its channel.
    ///
    /// Useful to drive a backend without a coordinator.
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<ResourceMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sends `event`; returns false once nobody listens anymore.
    pub fn emit(&self, event: ResourceEvent) -> bool {
        self.tx
            .send(ResourceMessage {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn started(&self) -> bool {
        self.emit(ResourceEvent::Started)
    }

    pub fn paused(&self) -> bool {
        self.emit(ResourceEvent::Paused)
    }

    pub fn ended(&self) -> bool {
        self.emit(ResourceEvent::Ended)
    }

    pub fn failed(&self, error: PlaybackError) -> bool {
        self.emit(ResourceEvent::Failed(error))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One loaded clip, exclusively owned by the coordinator.
///
/// All methods are synchronous and must return immediately. A resource must
/// not emit `Started` while it is paused.
pub trait AudioResource: Send {
    /// Starts or resumes playback.
    fn resume(&mut self);

    fn pause(&mut self);

    /// Stops playback and releases the underlying pipeline. Called once,
    /// right before the resource is dropped.
    fn stop(&mut self);
}

/// Factory of playable resources.
pub trait AudioBackend: Send + Sync {
    /// Prepares `source` for playback. The returned resource is paused until
    /// [`AudioResource::resume`] is called.
    ///
    /// Implementations must not call back into the coordinator from here.
    fn load(&self, source: &SourceId, events: EventSink) -> Box<dyn AudioResource>;
}
