//! AudioCoordinator: one logical playback channel for the whole application.
//!
//! The coordinator owns at most one [`AudioResource`]. Starting a different
//! source always stops and releases the current one first, so two clips never
//! overlap. State changes are published to callback listeners and to the
//! [`PlaybackEvent`] bus.
//!
//! ## State machine
//!
//! ```text
//!             play(new)                 Started
//!  Idle ─────────────────► Loading ─────────────────► Playing ◄──┐
//!   ▲                        │                          │  │     │ play(same) /
//!   │                        │ Failed                   │  │     │ Started
//!   │ Ended (+ completion)   ▼              pause() /   │  ▼     │
//!   └──────────────────── Errored           Paused      │ Paused ┘
//!                                                        │
//!   any state ── play(different) ──► Loading             │
//!   Paused before Started ── play(same) ──► Loading      │
//!   Playing ─────────────── Ended ───────────────────────┘ ─► Idle
//! ```
//!
//! Events coming from the media pipeline are applied by a single pump task,
//! in arrival order. Each resource gets a new generation number and events
//! from older generations are dropped.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::backend::{AudioBackend, AudioResource, EventSink, ResourceEvent, ResourceMessage};
use crate::events::{EventBus, PlaybackEvent};
use crate::listeners::{ListenerId, ListenerKind, ListenerRegistry, Subscription};
use crate::{PlaybackError, Result, SourceId};

/// State of the shared playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Errored,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// When state listeners learn that a newly requested source is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Notify `(true, source)` as soon as `play` is requested, before the
    /// pipeline confirms. A failure is corrected with `(false, source)`.
    #[default]
    Optimistic,
    /// Notify `(true, source)` only once the pipeline reports `Started`.
    Confirmed,
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(NotifyPolicy::Optimistic),
            "confirmed" => Ok(NotifyPolicy::Confirmed),
            other => Err(format!("Unknown notify policy: {other}")),
        }
    }
}

enum Notification {
    State { source: SourceId, is_playing: bool },
    Completed(SourceId),
    Transition {
        source: Option<SourceId>,
        from: PlaybackState,
        to: PlaybackState,
    },
    Failed {
        source: SourceId,
        error: PlaybackError,
    },
}

struct Session {
    active: Option<SourceId>,
    state: PlaybackState,
    /// What state listeners were last told about `active`.
    is_playing: bool,
    resource: Option<Box<dyn AudioResource>>,
    /// Whether the current resource reported `Started` at least once.
    started: bool,
    generation: u64,
    pending: Vec<oneshot::Sender<Result<()>>>,
}

impl Session {
    fn new() -> Self {
        Self {
            active: None,
            state: PlaybackState::Idle,
            is_playing: false,
            resource: None,
            started: false,
            generation: 0,
            pending: Vec::new(),
        }
    }

    fn transition(&mut self, to: PlaybackState, notes: &mut Vec<Notification>) {
        if self.state == to {
            return;
        }
        debug!(
            source = self.active.as_ref().map(SourceId::as_str).unwrap_or("-"),
            generation = self.generation,
            from = %self.state,
            to = %to,
            "Playback transition"
        );
        notes.push(Notification::Transition {
            source: self.active.clone(),
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn report_playing(&mut self, is_playing: bool, notes: &mut Vec<Notification>) {
        if self.is_playing == is_playing {
            return;
        }
        self.is_playing = is_playing;
        if let Some(source) = &self.active {
            notes.push(Notification::State {
                source: source.clone(),
                is_playing,
            });
        }
    }

    fn resolve_pending(&mut self, result: Result<()>) {
        for tx in self.pending.drain(..) {
            let _ = tx.send(result.clone());
        }
    }

    /// Stops and releases the current resource, whatever its state.
    fn release(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.stop();
        }
    }

    /// Tears down the active source and leaves the session in `to`.
    fn teardown(&mut self, to: PlaybackState, notes: &mut Vec<Notification>) {
        self.release();
        self.resolve_pending(Err(PlaybackError::Aborted));
        self.report_playing(false, notes);
        self.transition(to, notes);
        self.active = None;
    }
}

enum PlayStart {
    Done(Result<()>),
    Waiting(oneshot::Receiver<Result<()>>),
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    policy: NotifyPolicy,
    session: Mutex<Session>,
    // Serializes notification delivery; reentrant so listeners can call back in.
    dispatch: ReentrantMutex<()>,
    // Notifications raised from inside a listener wait here for the batch in flight.
    outbox: Mutex<VecDeque<Notification>>,
    draining: AtomicBool,
    listeners: Arc<ListenerRegistry>,
    bus: EventBus,
    event_tx: mpsc::UnboundedSender<ResourceMessage>,
}

/// Shared handle to the playback session.
///
/// Cloning is cheap; every clone drives the same session. Construct one per
/// application (or per test) and pass it to the components that need audio.
#[derive(Clone)]
pub struct AudioCoordinator {
    inner: Arc<Inner>,
}

/// Non-owning handle, see [`AudioCoordinator::downgrade`].
#[derive(Clone)]
pub struct WeakCoordinator {
    inner: Weak<Inner>,
}

impl WeakCoordinator {
    pub fn upgrade(&self) -> Option<AudioCoordinator> {
        self.inner.upgrade().map(|inner| AudioCoordinator { inner })
    }
}

impl AudioCoordinator {
    /// Creates a coordinator with optimistic notifications.
    ///
    /// Must be called from within a tokio runtime: the event pump is spawned
    /// on the current runtime.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_policy(backend, NotifyPolicy::default())
    }

    pub fn with_policy(backend: Arc<dyn AudioBackend>, policy: NotifyPolicy) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            backend,
            policy,
            session: Mutex::new(Session::new()),
            dispatch: ReentrantMutex::new(()),
            outbox: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            listeners: Arc::new(ListenerRegistry::new()),
            bus: EventBus::new(),
            event_tx,
        });

        tokio::spawn(event_pump(Arc::downgrade(&inner), event_rx));

        Self { inner }
    }

    pub fn downgrade(&self) -> WeakCoordinator {
        WeakCoordinator {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn notify_policy(&self) -> NotifyPolicy {
        self.inner.policy
    }

    /// Plays `source`, stopping anything else first.
    ///
    /// - a paused `source` is resumed without reloading it; if it was paused
    ///   before it ever started, the call waits for `Started` like a new load
    /// - a `source` already playing is left alone
    /// - a `source` still loading is joined
    ///
    /// Resolves once the pipeline confirms that audio started. Rejects with
    /// `Aborted` if another source is requested (or `pause`/`stop` is called)
    /// before that, and with `NetworkFailure`/`DecodeFailure` if the clip
    /// cannot be played. The coordinator never retries.
    pub async fn play(&self, source: impl Into<SourceId>) -> Result<()> {
        match self.begin_play(source.into()) {
            PlayStart::Done(result) => result,
            PlayStart::Waiting(rx) => rx.await.unwrap_or(Err(PlaybackError::Aborted)),
        }
    }

    fn begin_play(&self, source: SourceId) -> PlayStart {
        if source.is_empty() {
            return PlayStart::Done(Err(PlaybackError::InvalidSource(
                source.as_str().to_string(),
            )));
        }

        let _dispatch = self.inner.dispatch.lock();
        let mut notes = Vec::new();

        let start = {
            let mut session = self.inner.session.lock();
            let same = session.active.as_ref() == Some(&source);
            let state = session.state;

            match state {
                PlaybackState::Playing if same => PlayStart::Done(Ok(())),
                PlaybackState::Loading if same => {
                    let (tx, rx) = oneshot::channel();
                    session.pending.push(tx);
                    PlayStart::Waiting(rx)
                }
                PlaybackState::Paused if same => {
                    if let Some(resource) = session.resource.as_mut() {
                        resource.resume();
                    }
                    if session.started {
                        session.transition(PlaybackState::Playing, &mut notes);
                        session.report_playing(true, &mut notes);
                        PlayStart::Done(Ok(()))
                    } else {
                        // Paused before any audio came out: wait for Started again
                        session.transition(PlaybackState::Loading, &mut notes);
                        if self.inner.policy == NotifyPolicy::Optimistic {
                            session.report_playing(true, &mut notes);
                        }
                        let (tx, rx) = oneshot::channel();
                        session.pending.push(tx);
                        PlayStart::Waiting(rx)
                    }
                }
                _ => self.load(&mut session, source, &mut notes),
            }
        };

        self.dispatch(notes);
        start
    }

    fn load(
        &self,
        session: &mut Session,
        source: SourceId,
        notes: &mut Vec<Notification>,
    ) -> PlayStart {
        let to = if session.active.is_some() {
            PlaybackState::Loading
        } else {
            session.state
        };
        session.teardown(to, notes);

        session.generation += 1;
        session.started = false;
        let sink = EventSink::new(session.generation, self.inner.event_tx.clone());
        let mut resource = self.inner.backend.load(&source, sink);
        resource.resume();

        session.resource = Some(resource);
        session.active = Some(source);
        session.transition(PlaybackState::Loading, notes);
        if self.inner.policy == NotifyPolicy::Optimistic {
            session.report_playing(true, notes);
        }

        let (tx, rx) = oneshot::channel();
        session.pending.push(tx);
        PlayStart::Waiting(rx)
    }

    /// Pauses the active source. No-op unless something is playing or loading.
    ///
    /// The source stays loaded: a later `play` of the same id resumes it.
    pub fn pause(&self) {
        let _dispatch = self.inner.dispatch.lock();
        let mut notes = Vec::new();
        {
            let mut session = self.inner.session.lock();
            if matches!(
                session.state,
                PlaybackState::Playing | PlaybackState::Loading
            ) {
                if let Some(resource) = session.resource.as_mut() {
                    resource.pause();
                }
                session.resolve_pending(Err(PlaybackError::Aborted));
                session.report_playing(false, &mut notes);
                session.transition(PlaybackState::Paused, &mut notes);
            }
        }
        self.dispatch(notes);
    }

    /// Stops and releases the active source, if any.
    pub fn stop(&self) {
        let _dispatch = self.inner.dispatch.lock();
        let mut notes = Vec::new();
        {
            let mut session = self.inner.session.lock();
            if session.active.is_some() {
                session.teardown(PlaybackState::Idle, &mut notes);
            }
        }
        self.dispatch(notes);
    }

    /// True only if `source` is the active source and listeners were told it plays.
    pub fn is_playing(&self, source: impl AsRef<str>) -> bool {
        let session = self.inner.session.lock();
        session.is_playing
            && session
                .active
                .as_ref()
                .is_some_and(|active| active.as_str() == source.as_ref())
    }

    /// The loaded source (playing, loading or paused), if any.
    pub fn current_source(&self) -> Option<SourceId> {
        self.inner.session.lock().active.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.session.lock().state
    }

    pub fn add_state_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(bool, &SourceId) + Send + Sync + 'static,
    {
        self.inner.listeners.add_state(Arc::new(callback))
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(ListenerKind::State, id)
    }

    pub fn add_completion_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SourceId) + Send + Sync + 'static,
    {
        self.inner.listeners.add_completion(Arc::new(callback))
    }

    pub fn remove_completion_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(ListenerKind::Completion, id)
    }

    /// Registers a state listener for the lifetime of the returned guard.
    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool, &SourceId) + Send + Sync + 'static,
    {
        let id = self.add_state_listener(callback);
        Subscription::new(&self.inner.listeners, ListenerKind::State, id)
    }

    /// Registers a completion listener for the lifetime of the returned guard.
    pub fn subscribe_completion<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SourceId) + Send + Sync + 'static,
    {
        let id = self.add_completion_listener(callback);
        Subscription::new(&self.inner.listeners, ListenerKind::Completion, id)
    }

    /// Subscribes to the event bus. Each receiver gets every future event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.bus.subscribe()
    }

    pub fn state_listener_count(&self) -> usize {
        self.inner.listeners.state_count()
    }

    pub fn completion_listener_count(&self) -> usize {
        self.inner.listeners.completion_count()
    }

    fn handle_message(&self, message: ResourceMessage) {
        let _dispatch = self.inner.dispatch.lock();
        let mut notes = Vec::new();
        {
            let mut session = self.inner.session.lock();

            if message.generation != session.generation || session.resource.is_none() {
                trace!(
                    generation = message.generation,
                    current = session.generation,
                    event = ?message.event,
                    "Dropping stale resource event"
                );
                return;
            }

            match message.event {
                ResourceEvent::Started => {
                    session.started = true;
                    match session.state {
                        PlaybackState::Loading => {
                            session.transition(PlaybackState::Playing, &mut notes);
                            session.report_playing(true, &mut notes);
                            session.resolve_pending(Ok(()));
                        }
                        PlaybackState::Paused => {
                            // Resumed by the platform (media keys, focus regained)
                            session.transition(PlaybackState::Playing, &mut notes);
                            session.report_playing(true, &mut notes);
                        }
                        _ => {}
                    }
                }
                ResourceEvent::Paused => {
                    if matches!(
                        session.state,
                        PlaybackState::Playing | PlaybackState::Loading
                    ) {
                        session.resolve_pending(Err(PlaybackError::Aborted));
                        session.report_playing(false, &mut notes);
                        session.transition(PlaybackState::Paused, &mut notes);
                    }
                }
                ResourceEvent::Ended => {
                    if matches!(
                        session.state,
                        PlaybackState::Playing | PlaybackState::Loading
                    ) {
                        if let Some(source) = session.active.clone() {
                            session.resolve_pending(Ok(()));
                            session.release();
                            session.report_playing(false, &mut notes);
                            session.transition(PlaybackState::Idle, &mut notes);
                            session.active = None;
                            notes.push(Notification::Completed(source));
                        }
                    }
                }
                ResourceEvent::Failed(error) => {
                    if let Some(source) = session.active.clone() {
                        warn!(source = %source, error = %error, "Playback failed");
                        session.release();
                        session.resolve_pending(Err(error.clone()));
                        // Always corrected, even if (true, source) was never sent
                        session.is_playing = false;
                        notes.push(Notification::State {
                            source: source.clone(),
                            is_playing: false,
                        });
                        session.transition(PlaybackState::Errored, &mut notes);
                        session.active = None;
                        notes.push(Notification::Failed { source, error });
                    }
                }
            }
        }
        self.dispatch(notes);
    }

    /// Delivers notifications in order, with no session lock held.
    ///
    /// Callers hold the dispatch lock. A listener that calls back into the
    /// coordinator only queues its notifications: they are delivered after the
    /// rest of the batch that invoked the listener.
    fn dispatch(&self, notes: Vec<Notification>) {
        self.inner.outbox.lock().extend(notes);
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let _draining = DrainGuard(&self.inner.draining);

        loop {
            let next = self.inner.outbox.lock().pop_front();
            let Some(note) = next else {
                break;
            };
            self.deliver(note);
        }
    }

    fn deliver(&self, note: Notification) {
        match note {
            Notification::State { source, is_playing } => {
                self.inner.listeners.notify_state(is_playing, &source);
                self.inner
                    .bus
                    .publish(PlaybackEvent::StateChanged { source, is_playing });
            }
            Notification::Completed(source) => {
                debug!(source = %source, "Playback completed");
                self.inner.listeners.notify_completion(&source);
                self.inner.bus.publish(PlaybackEvent::Completed { source });
            }
            Notification::Transition { source, from, to } => {
                self.inner
                    .bus
                    .publish(PlaybackEvent::Transition { source, from, to });
            }
            Notification::Failed { source, error } => {
                self.inner
                    .bus
                    .publish(PlaybackEvent::Failed { source, error });
            }
        }
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for AudioCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("AudioCoordinator")
            .field("active", &session.active)
            .field("state", &session.state)
            .field("is_playing", &session.is_playing)
            .field("generation", &session.generation)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

/// Applies pipeline events one at a time until the coordinator is dropped.
async fn event_pump(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<ResourceMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        AudioCoordinator { inner }.handle_message(message);
    }
    trace!("Audio event pump stopped");
}
