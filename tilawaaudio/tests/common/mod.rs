//! Shared fixtures for the coordinator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tilawaaudio::{
    AudioBackend, AudioCoordinator, AudioResource, EventSink, PlaybackError, SourceId,
    Subscription,
};

/// How a scripted resource reacts when it is resumed.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reports `Started` on the first resume.
    AutoStart,
    /// Stays silent; the test drives the sink by hand.
    Manual,
    /// Reports `Failed` on the first resume.
    Fail(PlaybackError),
}

#[derive(Clone)]
pub struct LoadRecord {
    pub source: SourceId,
    pub sink: EventSink,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

#[derive(Default)]
struct Script {
    behaviors: HashMap<String, Behavior>,
    loads: Vec<LoadRecord>,
}

/// In-memory backend recording every load and resource call.
#[derive(Clone)]
pub struct ScriptedBackend {
    default: Behavior,
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn auto_start() -> Self {
        Self::new(Behavior::AutoStart)
    }

    pub fn manual() -> Self {
        Self::new(Behavior::Manual)
    }

    pub fn set_behavior(&self, source: &str, behavior: Behavior) {
        self.script
            .lock()
            .behaviors
            .insert(source.to_string(), behavior);
    }

    /// Sources in load order.
    pub fn loads(&self) -> Vec<String> {
        self.script
            .lock()
            .loads
            .iter()
            .map(|l| l.source.to_string())
            .collect()
    }

    pub fn load_count(&self) -> usize {
        self.script.lock().loads.len()
    }

    pub fn record(&self, index: usize) -> LoadRecord {
        self.script.lock().loads[index].clone()
    }

    /// Most recent load of `source`.
    pub fn latest(&self, source: &str) -> LoadRecord {
        self.script
            .lock()
            .loads
            .iter()
            .rev()
            .find(|l| l.source == source)
            .cloned()
            .unwrap_or_else(|| panic!("{source} was never loaded"))
    }

    /// Simulates the natural end of the latest load of `source`.
    pub fn finish(&self, source: &str) {
        self.latest(source).sink.ended();
    }

    pub fn calls(&self, index: usize) -> Vec<&'static str> {
        self.record(index).calls.lock().clone()
    }
}

impl AudioBackend for ScriptedBackend {
    fn load(&self, source: &SourceId, events: EventSink) -> Box<dyn AudioResource> {
        let mut script = self.script.lock();
        let behavior = script
            .behaviors
            .get(source.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));

        script.loads.push(LoadRecord {
            source: source.clone(),
            sink: events.clone(),
            calls: calls.clone(),
        });

        Box::new(ScriptedResource {
            behavior,
            sink: events,
            calls,
            resumed: false,
        })
    }
}

struct ScriptedResource {
    behavior: Behavior,
    sink: EventSink,
    calls: Arc<Mutex<Vec<&'static str>>>,
    resumed: bool,
}

impl AudioResource for ScriptedResource {
    fn resume(&mut self) {
        self.calls.lock().push("resume");
        if self.resumed {
            return;
        }
        self.resumed = true;
        match &self.behavior {
            Behavior::AutoStart => {
                self.sink.started();
            }
            Behavior::Manual => {}
            Behavior::Fail(err) => {
                self.sink.failed(err.clone());
            }
        }
    }

    fn pause(&mut self) {
        self.calls.lock().push("pause");
    }

    fn stop(&mut self) {
        self.calls.lock().push("stop");
    }
}

/// Lets the event pump drain pending resource events.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub type StateLog = Arc<Mutex<Vec<(bool, String)>>>;

/// Records every state listener call.
pub fn record_states(coordinator: &AudioCoordinator) -> (Subscription, StateLog) {
    let log: StateLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let subscription = coordinator.subscribe_state(move |playing, source| {
        sink.lock().push((playing, source.to_string()));
    });
    (subscription, log)
}

/// Records every completion listener call.
pub fn record_completions(
    coordinator: &AudioCoordinator,
) -> (Subscription, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let subscription = coordinator.subscribe_completion(move |source| {
        sink.lock().push(source.to_string());
    });
    (subscription, log)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal 16-bit PCM WAV file.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let data_len = (frames * usize::from(channels) * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
