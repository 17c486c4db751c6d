//! # tilawaaudio - Single-channel audio playback for Tilawa
//!
//! This crate serializes every verse recitation and lesson pronunciation clip
//! through one logical playback channel: starting a clip always silences the
//! previous one, and observers learn about transitions without polling.
//!
//! # Architecture
//!
//! - **AudioCoordinator**: owns at most one [`AudioResource`] and drives the
//!   `Idle / Loading / Playing / Paused / Errored` state machine
//! - **AudioBackend**: seam to the media pipeline; [`HttpStreamBackend`]
//!   fetches clips with `reqwest` and decodes them with `symphonia`
//! - **AutoAdvance**: plays the next verse of a sequence when the current one
//!   completes, if the user preference allows it
//! - **FallbackPlayer**: tries an ordered list of mirror URLs for one item
//! - **sources**: verse keys and recitation / pronunciation URL builders
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilawaaudio::{
//!     AudioCoordinator, AutoAdvance, FallbackPlayer, HttpStreamBackend, Reciter,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = AudioCoordinator::new(Arc::new(HttpStreamBackend::new()));
//!
//! let reciter = Reciter::default();
//! let verses = reciter.surah_candidates(1)?;
//!
//! // Keep the handle alive as long as the surah is on screen
//! let _advance = AutoAdvance::with_candidates(verses.clone())
//!     .on_advance(|index| println!("now reciting ayah {}", index + 1))
//!     .activate(&coordinator, Arc::new(true));
//!
//! FallbackPlayer::new(coordinator.clone()).play(&verses[0]).await?;
//! # Ok(())
//! # }
//! ```

pub mod auto_advance;
pub mod backend;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fallback;
pub mod listeners;
pub mod sources;

#[cfg(feature = "tilawaconfig")]
mod config_ext;

use std::fmt;
use std::sync::Arc;

pub use auto_advance::{
    ActiveAutoAdvance, AdvanceEnd, AutoAdvance, AutoAdvancePreference, FnPreference,
};
pub use backend::stream::{ClockSink, HttpStreamBackend, NullSink, PcmChunk, PcmSink};
pub use backend::{AudioBackend, AudioResource, EventSink, ResourceEvent, ResourceMessage};
pub use coordinator::{AudioCoordinator, NotifyPolicy, PlaybackState, WeakCoordinator};
pub use error::{FailedAttempt, FailureReason, FallbackError, PlaybackError, Result};
pub use events::PlaybackEvent;
pub use fallback::FallbackPlayer;
pub use listeners::{ListenerId, Subscription};
pub use sources::{Pronunciation, Reciter, VerseKey, VerseKeyError};

#[cfg(feature = "tilawaconfig")]
pub use config_ext::AudioConfigExt;

/// Identifier (URL) of one playable audio clip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for SourceId {
    fn from(value: &String) -> Self {
        Self::new(value)
    }
}

impl From<&SourceId> for SourceId {
    fn from(value: &SourceId) -> Self {
        value.clone()
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SourceId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for SourceId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
