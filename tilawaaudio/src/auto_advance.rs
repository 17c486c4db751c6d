//! Sequential auto-play over an ordered list of verses.
//!
//! Each item of the sequence is one verse with one or more candidate URLs
//! (mirrors). When any candidate of an item completes naturally and the user
//! preference allows it, the next item is played after a short delay through
//! a [`FallbackPlayer`], so later verses fall back to mirrors too. The
//! preference is read on every completion, not only at activation, so
//! switching it off in the settings stops the chain at the next verse boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::coordinator::{AudioCoordinator, WeakCoordinator};
use crate::error::FallbackError;
use crate::fallback::FallbackPlayer;
use crate::listeners::Subscription;
use crate::SourceId;

/// Pause between the end of one verse and the start of the next.
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_millis(500);

type AdvanceCallback = Arc<dyn Fn(usize) + Send + Sync>;
type EndCallback = Arc<dyn Fn(AdvanceEnd) + Send + Sync>;

/// Why a chain of automatic advances stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceEnd {
    /// The last item of the sequence completed.
    Finished,
    /// The preference was off when an item completed.
    Disabled,
    /// Another source was started before the next item could take over.
    Interrupted,
    /// No candidate of the item at `index` could be played.
    Unavailable { index: usize },
}

/// Source of the "auto-play next verse" user preference.
pub trait AutoAdvancePreference: Send + Sync {
    fn auto_advance_enabled(&self) -> bool;
}

impl AutoAdvancePreference for bool {
    fn auto_advance_enabled(&self) -> bool {
        *self
    }
}

impl AutoAdvancePreference for AtomicBool {
    fn auto_advance_enabled(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Adapts a closure into an [`AutoAdvancePreference`].
pub struct FnPreference<F>(pub F);

impl<F> AutoAdvancePreference for FnPreference<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn auto_advance_enabled(&self) -> bool {
        (self.0)()
    }
}

/// Builder for an auto-advance controller.
pub struct AutoAdvance {
    items: Arc<[Vec<SourceId>]>,
    delay: Duration,
    attempt_timeout: Option<Duration>,
    on_advance: Option<AdvanceCallback>,
    on_end: Option<EndCallback>,
}

impl AutoAdvance {
    /// Sequence where every item has a single source.
    pub fn new(sources: impl Into<Vec<SourceId>>) -> Self {
        Self::with_candidates(
            sources
                .into()
                .into_iter()
                .map(|source| vec![source])
                .collect::<Vec<_>>(),
        )
    }

    /// Sequence of items, each with its candidate sources in fallback order.
    pub fn with_candidates(items: impl Into<Vec<Vec<SourceId>>>) -> Self {
        Self {
            items: Arc::from(items.into()),
            delay: DEFAULT_ADVANCE_DELAY,
            attempt_timeout: None,
            on_advance: None,
            on_end: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Per-candidate timeout used when falling back, see
    /// [`FallbackPlayer::with_attempt_timeout`].
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Called with the index of the next source right before it is played,
    /// so the caller can scroll to it or highlight it.
    pub fn on_advance<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_advance = Some(Arc::new(callback));
        self
    }

    /// Called when a chain of advances stops. The controller stays active:
    /// a later completion of an item starts a new chain.
    pub fn on_end<F>(mut self, callback: F) -> Self
    where
        F: Fn(AdvanceEnd) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(callback));
        self
    }

    /// Starts observing completions of `coordinator`.
    ///
    /// The controller is inert if the list is empty or if the preference is
    /// off at activation time. It stays active until the handle is dropped.
    pub fn activate(
        self,
        coordinator: &AudioCoordinator,
        preference: Arc<dyn AutoAdvancePreference>,
    ) -> ActiveAutoAdvance {
        let active = Arc::new(AtomicBool::new(false));

        if self.items.is_empty() {
            debug!("Auto-advance not activated: empty sequence");
            return ActiveAutoAdvance {
                subscription: None,
                active,
            };
        }
        if !preference.auto_advance_enabled() {
            debug!("Auto-advance not activated: disabled by preference");
            return ActiveAutoAdvance {
                subscription: None,
                active,
            };
        }

        active.store(true, Ordering::Release);

        let state = Arc::new(AdvanceState {
            items: self.items,
            delay: self.delay,
            attempt_timeout: self.attempt_timeout,
            on_advance: self.on_advance,
            on_end: self.on_end,
            preference,
            coordinator: coordinator.downgrade(),
            active: active.clone(),
        });

        let subscription = coordinator.subscribe_completion(move |completed| {
            state.clone().on_completed(completed);
        });

        info!("Auto-advance activated");

        ActiveAutoAdvance {
            subscription: Some(subscription),
            active,
        }
    }
}

struct AdvanceState {
    items: Arc<[Vec<SourceId>]>,
    delay: Duration,
    attempt_timeout: Option<Duration>,
    on_advance: Option<AdvanceCallback>,
    on_end: Option<EndCallback>,
    preference: Arc<dyn AutoAdvancePreference>,
    coordinator: WeakCoordinator,
    active: Arc<AtomicBool>,
}

impl AdvanceState {
    fn on_completed(self: Arc<Self>, completed: &SourceId) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let Some(index) = self
            .items
            .iter()
            .position(|candidates| candidates.contains(completed))
        else {
            debug!(source = %completed, "Completed source is not part of the sequence");
            return;
        };

        if !self.preference.auto_advance_enabled() {
            debug!(source = %completed, "Auto-advance skipped: disabled by preference");
            self.end(AdvanceEnd::Disabled);
            return;
        }

        let next_index = index + 1;
        if next_index >= self.items.len() {
            debug!(source = %completed, "Reached end of sequence");
            self.end(AdvanceEnd::Finished);
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime available, cannot schedule next source");
                return;
            }
        };

        handle.spawn(async move {
            tokio::time::sleep(self.delay).await;
            self.advance(next_index).await;
        });
    }

    async fn advance(&self, next_index: usize) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if let Some(current) = coordinator.current_source() {
            debug!(current = %current, "Auto-advance cancelled: another source was started");
            self.end(AdvanceEnd::Interrupted);
            return;
        }

        if let Some(callback) = &self.on_advance {
            callback(next_index);
        }

        debug!(index = next_index, "Auto-advancing");
        let player = FallbackPlayer::new(coordinator).with_attempt_timeout(self.attempt_timeout);
        match player.play(&self.items[next_index]).await {
            Ok(source) => {
                debug!(source = %source, index = next_index, "Auto-advanced");
            }
            Err(FallbackError::Superseded(source)) => {
                debug!(source = %source, "Auto-advance superseded by another request");
                self.end(AdvanceEnd::Interrupted);
            }
            Err(e) => {
                warn!(index = next_index, error = %e, "Auto-advance playback did not start");
                self.end(AdvanceEnd::Unavailable { index: next_index });
            }
        }
    }

    fn end(&self, reason: AdvanceEnd) {
        if let Some(callback) = &self.on_end {
            callback(reason);
        }
    }
}

/// Handle of an activated [`AutoAdvance`]. Dropping it deactivates the
/// controller, including any advance already scheduled.
#[must_use = "dropping the handle deactivates auto-advance"]
pub struct ActiveAutoAdvance {
    subscription: Option<Subscription>,
    active: Arc<AtomicBool>,
}

impl ActiveAutoAdvance {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(self) {}
}

impl Drop for ActiveAutoAdvance {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.subscription.take();
    }
}

impl std::fmt::Debug for ActiveAutoAdvance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveAutoAdvance")
            .field("active", &self.is_active())
            .field("subscription", &self.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_impls() {
        assert!(true.auto_advance_enabled());
        assert!(!false.auto_advance_enabled());

        let flag = AtomicBool::new(true);
        assert!(flag.auto_advance_enabled());
        flag.store(false, Ordering::Release);
        assert!(!flag.auto_advance_enabled());

        assert!(FnPreference(|| true).auto_advance_enabled());
    }

    #[test]
    fn test_builder_defaults() {
        let advance = AutoAdvance::new(vec![SourceId::from("a.mp3"), SourceId::from("b.mp3")]);
        assert_eq!(advance.delay, DEFAULT_ADVANCE_DELAY);
        assert_eq!(advance.attempt_timeout, None);
        assert!(advance.on_advance.is_none());
        assert_eq!(
            &*advance.items,
            &[vec![SourceId::from("a.mp3")], vec![SourceId::from("b.mp3")]]
        );

        let advance = advance.with_delay(Duration::from_secs(1));
        assert_eq!(advance.delay, Duration::from_secs(1));
    }
}
