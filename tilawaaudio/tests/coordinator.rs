mod common;

use std::sync::Arc;

use common::{Behavior, ScriptedBackend, init_tracing, record_completions, record_states, settle};
use parking_lot::Mutex;
use tilawaaudio::{
    AudioCoordinator, NotifyPolicy, PlaybackError, PlaybackEvent, PlaybackState, SourceId,
};

fn coordinator(backend: &ScriptedBackend) -> AudioCoordinator {
    init_tracing();
    AudioCoordinator::new(Arc::new(backend.clone()))
}

fn spawn_play(
    coordinator: &AudioCoordinator,
    source: &'static str,
) -> tokio::task::JoinHandle<Result<(), PlaybackError>> {
    let coordinator = coordinator.clone();
    tokio::spawn(async move { coordinator.play(source).await })
}

fn states(log: &common::StateLog) -> Vec<(bool, String)> {
    log.lock().clone()
}

fn s(playing: bool, source: &str) -> (bool, String) {
    (playing, source.to_string())
}

#[tokio::test]
async fn test_switching_source_stops_the_previous_one() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    coordinator.play("a.mp3").await.unwrap();
    coordinator.play("b.mp3").await.unwrap();

    assert_eq!(coordinator.current_source(), Some(SourceId::from("b.mp3")));
    assert!(coordinator.is_playing("b.mp3"));
    assert!(!coordinator.is_playing("a.mp3"));
    assert_eq!(backend.calls(0), vec!["resume", "stop"]);
    assert_eq!(
        states(&log),
        vec![s(true, "a.mp3"), s(false, "a.mp3"), s(true, "b.mp3")]
    );
}

#[tokio::test]
async fn test_no_true_for_old_source_after_switch() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    let first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    let second = spawn_play(&coordinator, "b.mp3");
    settle().await;

    // The superseded resource confirms late
    backend.record(0).sink.started();
    backend.latest("b.mp3").sink.started();
    settle().await;

    assert_eq!(first.await.unwrap(), Err(PlaybackError::Aborted));
    assert_eq!(second.await.unwrap(), Ok(()));

    let log = states(&log);
    let switch = log.iter().position(|e| *e == s(false, "a.mp3")).unwrap();
    assert!(!log[switch..].contains(&s(true, "a.mp3")));
    assert_eq!(coordinator.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_stale_end_event_is_ignored() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);
    let (_completion, completions) = record_completions(&coordinator);

    let _first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    let _second = spawn_play(&coordinator, "b.mp3");
    settle().await;

    backend.record(0).sink.ended();
    settle().await;

    assert!(completions.lock().is_empty());
    assert_eq!(coordinator.state(), PlaybackState::Loading);
    assert_eq!(coordinator.current_source(), Some(SourceId::from("b.mp3")));
}

#[tokio::test]
async fn test_resume_without_reload() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let mut events = coordinator.subscribe_events();
    let (_sub, log) = record_states(&coordinator);

    coordinator.play("x.mp3").await.unwrap();
    coordinator.pause();
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert_eq!(coordinator.current_source(), Some(SourceId::from("x.mp3")));

    coordinator.play("x.mp3").await.unwrap();
    assert_eq!(coordinator.state(), PlaybackState::Playing);

    assert_eq!(backend.load_count(), 1);
    assert_eq!(backend.calls(0), vec!["resume", "pause", "resume"]);
    assert_eq!(
        states(&log),
        vec![s(true, "x.mp3"), s(false, "x.mp3"), s(true, "x.mp3")]
    );

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlaybackEvent::Transition { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (PlaybackState::Idle, PlaybackState::Loading),
            (PlaybackState::Loading, PlaybackState::Playing),
            (PlaybackState::Playing, PlaybackState::Paused),
            (PlaybackState::Paused, PlaybackState::Playing),
        ]
    );
}

#[tokio::test]
async fn test_play_same_source_while_playing_is_noop() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    coordinator.play("x.mp3").await.unwrap();
    coordinator.play("x.mp3").await.unwrap();

    assert_eq!(backend.load_count(), 1);
    assert_eq!(states(&log), vec![s(true, "x.mp3")]);
}

#[tokio::test]
async fn test_concurrent_play_of_same_source_joins_loading() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);

    let first = spawn_play(&coordinator, "x.mp3");
    let second = spawn_play(&coordinator, "x.mp3");
    settle().await;
    assert_eq!(backend.load_count(), 1);

    backend.latest("x.mp3").sink.started();

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_completion_fires_exactly_once() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let (_completion, completions) = record_completions(&coordinator);
    let (_sub, log) = record_states(&coordinator);

    coordinator.play("a.mp3").await.unwrap();
    backend.finish("a.mp3");
    settle().await;
    backend.finish("a.mp3");
    backend.latest("a.mp3").sink.started();
    settle().await;

    assert_eq!(*completions.lock(), vec!["a.mp3".to_string()]);
    assert_eq!(states(&log), vec![s(true, "a.mp3"), s(false, "a.mp3")]);
    assert_eq!(coordinator.state(), PlaybackState::Idle);
    assert_eq!(coordinator.current_source(), None);
    assert_eq!(backend.calls(0), vec!["resume", "stop"]);
}

#[tokio::test]
async fn test_failed_play_leaves_nothing_loading() {
    let backend = ScriptedBackend::auto_start();
    backend.set_behavior(
        "x.mp3",
        Behavior::Fail(PlaybackError::network("HTTP 404 Not Found")),
    );
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);
    let mut events = coordinator.subscribe_events();

    let err = coordinator.play("x.mp3").await.unwrap_err();

    assert!(matches!(err, PlaybackError::NetworkFailure(_)));
    assert_eq!(coordinator.current_source(), None);
    assert!(!coordinator.is_playing("x.mp3"));
    assert_eq!(coordinator.state(), PlaybackState::Errored);
    assert_eq!(states(&log), vec![s(true, "x.mp3"), s(false, "x.mp3")]);

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let PlaybackEvent::Failed { source, error } = event {
            failed = Some((source, error));
        }
    }
    assert_eq!(failed, Some((SourceId::from("x.mp3"), err)));
}

#[tokio::test]
async fn test_play_after_error_recovers() {
    let backend = ScriptedBackend::auto_start();
    backend.set_behavior("x.mp3", Behavior::Fail(PlaybackError::decode("bad frame")));
    let coordinator = coordinator(&backend);

    assert!(coordinator.play("x.mp3").await.is_err());
    coordinator.play("y.mp3").await.unwrap();

    assert_eq!(coordinator.state(), PlaybackState::Playing);
    assert!(coordinator.is_playing("y.mp3"));
}

#[tokio::test]
async fn test_confirmed_policy_waits_for_start() {
    let backend = ScriptedBackend::manual();
    let coordinator =
        AudioCoordinator::with_policy(Arc::new(backend.clone()), NotifyPolicy::Confirmed);
    let (_sub, log) = record_states(&coordinator);

    let play = spawn_play(&coordinator, "a.mp3");
    settle().await;
    assert!(states(&log).is_empty());
    assert!(!coordinator.is_playing("a.mp3"));
    assert_eq!(coordinator.state(), PlaybackState::Loading);

    backend.latest("a.mp3").sink.started();
    assert_eq!(play.await.unwrap(), Ok(()));
    assert_eq!(states(&log), vec![s(true, "a.mp3")]);
}

#[tokio::test]
async fn test_confirmed_policy_still_reports_failure() {
    let backend = ScriptedBackend::auto_start();
    backend.set_behavior("a.mp3", Behavior::Fail(PlaybackError::network("reset")));
    let coordinator =
        AudioCoordinator::with_policy(Arc::new(backend.clone()), NotifyPolicy::Confirmed);
    let (_sub, log) = record_states(&coordinator);

    assert!(coordinator.play("a.mp3").await.is_err());
    assert_eq!(states(&log), vec![s(false, "a.mp3")]);
}

#[tokio::test]
async fn test_pause_while_loading_aborts_the_pending_play() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);

    let play = spawn_play(&coordinator, "a.mp3");
    settle().await;
    coordinator.pause();

    assert_eq!(play.await.unwrap(), Err(PlaybackError::Aborted));
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert_eq!(coordinator.current_source(), Some(SourceId::from("a.mp3")));
}

#[tokio::test]
async fn test_stop_while_loading_aborts_the_pending_play() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);

    let play = spawn_play(&coordinator, "a.mp3");
    settle().await;
    coordinator.stop();

    assert_eq!(play.await.unwrap(), Err(PlaybackError::Aborted));
    assert_eq!(coordinator.state(), PlaybackState::Idle);
    assert_eq!(coordinator.current_source(), None);
    assert_eq!(backend.calls(0), vec!["resume", "stop"]);
}

#[tokio::test]
async fn test_platform_pause_and_resume() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    coordinator.play("a.mp3").await.unwrap();

    backend.latest("a.mp3").sink.paused();
    settle().await;
    assert_eq!(coordinator.state(), PlaybackState::Paused);
    assert!(!coordinator.is_playing("a.mp3"));

    backend.latest("a.mp3").sink.started();
    settle().await;
    assert_eq!(coordinator.state(), PlaybackState::Playing);
    assert_eq!(
        states(&log),
        vec![s(true, "a.mp3"), s(false, "a.mp3"), s(true, "a.mp3")]
    );
}

#[tokio::test]
async fn test_listener_sees_consistent_state() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let observed = Arc::new(Mutex::new(Vec::new()));

    let weak = coordinator.downgrade();
    let seen = observed.clone();
    let _sub = coordinator.subscribe_state(move |playing, source| {
        if let Some(coordinator) = weak.upgrade() {
            seen.lock().push(coordinator.is_playing(source) == playing);
        }
    });

    coordinator.play("a.mp3").await.unwrap();
    coordinator.pause();
    coordinator.play("b.mp3").await.unwrap();

    assert!(!observed.lock().is_empty());
    assert!(observed.lock().iter().all(|consistent| *consistent));
}

#[tokio::test]
async fn test_listener_may_call_back_into_coordinator() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);

    let weak = coordinator.downgrade();
    let _sub = coordinator.subscribe_state(move |playing, _source| {
        if playing {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.pause();
            }
        }
    });

    let result = coordinator.play("a.mp3").await;

    assert_eq!(result, Err(PlaybackError::Aborted));
    assert_eq!(coordinator.state(), PlaybackState::Paused);
}

#[tokio::test]
async fn test_remove_listeners() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let calls = Arc::new(Mutex::new(0usize));

    let counter = calls.clone();
    let id = coordinator.add_state_listener(move |_, _| *counter.lock() += 1);
    let completion = coordinator.add_completion_listener(|_| {});
    assert_eq!(coordinator.state_listener_count(), 1);
    assert_eq!(coordinator.completion_listener_count(), 1);

    assert!(coordinator.remove_state_listener(id));
    assert!(!coordinator.remove_state_listener(id));
    assert!(!coordinator.remove_completion_listener(id));
    assert!(coordinator.remove_completion_listener(completion));

    coordinator.play("a.mp3").await.unwrap();
    assert_eq!(*calls.lock(), 0);
}

#[tokio::test]
async fn test_subscription_drop_unregisters() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);

    let (sub, log) = record_states(&coordinator);
    assert_eq!(coordinator.state_listener_count(), 1);
    drop(sub);
    assert_eq!(coordinator.state_listener_count(), 0);

    coordinator.play("a.mp3").await.unwrap();
    assert!(states(&log).is_empty());
}

#[tokio::test]
async fn test_event_bus_mirrors_listeners() {
    let backend = ScriptedBackend::auto_start();
    let coordinator = coordinator(&backend);
    let mut events = coordinator.subscribe_events();

    coordinator.play("a.mp3").await.unwrap();
    backend.finish("a.mp3");
    settle().await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, PlaybackEvent::Transition { .. }) {
            received.push(event);
        }
    }
    assert_eq!(
        received,
        vec![
            PlaybackEvent::StateChanged {
                source: SourceId::from("a.mp3"),
                is_playing: true
            },
            PlaybackEvent::StateChanged {
                source: SourceId::from("a.mp3"),
                is_playing: false
            },
            PlaybackEvent::Completed {
                source: SourceId::from("a.mp3")
            },
        ]
    );
}

#[tokio::test]
async fn test_isolated_coordinators() {
    let backend_a = ScriptedBackend::auto_start();
    let backend_b = ScriptedBackend::auto_start();
    let first = coordinator(&backend_a);
    let second = coordinator(&backend_b);

    first.play("a.mp3").await.unwrap();

    assert!(first.is_playing("a.mp3"));
    assert_eq!(second.current_source(), None);
    assert_eq!(backend_b.load_count(), 0);
}

#[tokio::test]
async fn test_play_stays_pending_until_started() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);

    let mut play = tokio_test::task::spawn(coordinator.play("a.mp3"));
    tokio_test::assert_pending!(play.poll());
    assert_eq!(coordinator.state(), PlaybackState::Loading);

    backend.latest("a.mp3").sink.started();
    settle().await;

    assert!(play.is_woken());
    tokio_test::assert_ready_ok!(play.poll());
}

#[tokio::test]
async fn test_resume_before_start_waits_for_started() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);

    let first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    coordinator.pause();
    assert_eq!(first.await.unwrap(), Err(PlaybackError::Aborted));

    let mut second = tokio_test::task::spawn(coordinator.play("a.mp3"));
    tokio_test::assert_pending!(second.poll());
    assert_eq!(coordinator.state(), PlaybackState::Loading);
    assert_eq!(backend.load_count(), 1);
    assert_eq!(backend.calls(0), vec!["resume", "pause", "resume"]);

    backend.latest("a.mp3").sink.started();
    settle().await;

    assert!(second.is_woken());
    tokio_test::assert_ready_ok!(second.poll());
    assert_eq!(coordinator.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_resume_before_start_reports_failure() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    let first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    coordinator.pause();
    assert_eq!(first.await.unwrap(), Err(PlaybackError::Aborted));

    let second = spawn_play(&coordinator, "a.mp3");
    settle().await;
    backend
        .latest("a.mp3")
        .sink
        .failed(PlaybackError::network("HTTP 404 Not Found"));

    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, PlaybackError::NetworkFailure(_)), "{err:?}");
    assert_eq!(coordinator.state(), PlaybackState::Errored);
    assert!(!coordinator.is_playing("a.mp3"));
    assert_eq!(states(&log).last(), Some(&s(false, "a.mp3")));
}

#[tokio::test]
async fn test_confirmed_resume_before_start_is_not_playing() {
    let backend = ScriptedBackend::manual();
    let coordinator =
        AudioCoordinator::with_policy(Arc::new(backend.clone()), NotifyPolicy::Confirmed);
    let (_sub, log) = record_states(&coordinator);

    let first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    coordinator.pause();
    assert_eq!(first.await.unwrap(), Err(PlaybackError::Aborted));

    let second = spawn_play(&coordinator, "a.mp3");
    settle().await;
    assert!(!coordinator.is_playing("a.mp3"));
    assert!(states(&log).is_empty());

    backend.latest("a.mp3").sink.started();
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(states(&log), vec![s(true, "a.mp3")]);
}

#[tokio::test]
async fn test_reentrant_notifications_follow_the_current_batch() {
    let backend = ScriptedBackend::manual();
    let coordinator = coordinator(&backend);
    let (_sub, log) = record_states(&coordinator);

    // Pauses whatever replaced "a.mp3" as soon as a is reported stopped
    let weak = coordinator.downgrade();
    let _pause_on_switch = coordinator.subscribe_state(move |playing, source| {
        if !playing && source.as_str() == "a.mp3" {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.pause();
            }
        }
    });

    let _first = spawn_play(&coordinator, "a.mp3");
    settle().await;
    let second = spawn_play(&coordinator, "b.mp3");
    settle().await;

    assert_eq!(second.await.unwrap(), Err(PlaybackError::Aborted));
    assert_eq!(
        states(&log),
        vec![
            s(true, "a.mp3"),
            s(false, "a.mp3"),
            s(true, "b.mp3"),
            s(false, "b.mp3")
        ]
    );
    assert!(!coordinator.is_playing("b.mp3"));
    assert_eq!(coordinator.state(), PlaybackState::Paused);
}
