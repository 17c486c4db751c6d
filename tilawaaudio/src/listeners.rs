//! Observer registry for the playback coordinator.
//!
//! Two independent channels: state listeners see every `(is_playing, source)`
//! transition, completion listeners only see natural ends of playback.
//! Registration returns a [`ListenerId`] token; [`Subscription`] wraps it and
//! unregisters on drop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::SourceId;

pub(crate) type StateCallback = Arc<dyn Fn(bool, &SourceId) + Send + Sync>;
pub(crate) type CompletionCallback = Arc<dyn Fn(&SourceId) + Send + Sync>;

/// Token identifying one registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListenerKind {
    State,
    Completion,
}

pub(crate) struct ListenerRegistry {
    state: RwLock<BTreeMap<u64, StateCallback>>,
    completion: RwLock<BTreeMap<u64, CompletionCallback>>,
    counter: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(BTreeMap::new()),
            completion: RwLock::new(BTreeMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_state(&self, cb: StateCallback) -> ListenerId {
        let id = self.next_id();
        self.state.write().insert(id, cb);
        ListenerId(id)
    }

    pub(crate) fn add_completion(&self, cb: CompletionCallback) -> ListenerId {
        let id = self.next_id();
        self.completion.write().insert(id, cb);
        ListenerId(id)
    }

    pub(crate) fn remove(&self, kind: ListenerKind, id: ListenerId) -> bool {
        match kind {
            ListenerKind::State => self.state.write().remove(&id.0).is_some(),
            ListenerKind::Completion => self.completion.write().remove(&id.0).is_some(),
        }
    }

    pub(crate) fn state_count(&self) -> usize {
        self.state.read().len()
    }

    pub(crate) fn completion_count(&self) -> usize {
        self.completion.read().len()
    }

    /// Calls every state listener in registration order.
    ///
    /// The callbacks are snapshotted first: a listener may add or remove
    /// listeners, or call back into the coordinator.
    pub(crate) fn notify_state(&self, is_playing: bool, source: &SourceId) {
        let callbacks: Vec<StateCallback> = self.state.read().values().cloned().collect();
        for cb in callbacks {
            cb(is_playing, source);
        }
    }

    pub(crate) fn notify_completion(&self, source: &SourceId) {
        let callbacks: Vec<CompletionCallback> =
            self.completion.read().values().cloned().collect();
        for cb in callbacks {
            cb(source);
        }
    }
}

/// Scoped listener registration, removed when dropped.
#[must_use = "dropping a Subscription unregisters the listener immediately"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    kind: ListenerKind,
    id: ListenerId,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<ListenerRegistry>, kind: ListenerKind, id: ListenerId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            kind,
            id,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Keeps the listener registered past the lifetime of this guard.
    pub fn detach(mut self) -> ListenerId {
        self.registry = Weak::new();
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}
