//! Recites a surah verse by verse, falling back to mirrors and auto-advancing.
//!
//! ```text
//! RUST_LOG=tilawaaudio=debug cargo run -p tilawaaudio --example recite_surah -- 112
//! ```
//!
//! Without `RUST_LOG`, the level comes from `host.logger.min_level` and
//! console output can be turned off with `host.logger.enable_console`.

use std::sync::Arc;

use tilawaaudio::{
    AdvanceEnd, AudioConfigExt, AudioCoordinator, AutoAdvance, FallbackPlayer, HttpStreamBackend,
    PlaybackEvent, VerseKey,
};
use tilawaconfig::Config;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let enable_console = match config.get_log_enable_console() {
        Ok(b) => b,
        Err(_) => true,
    };
    if !enable_console {
        return;
    }

    let level = match config.get_log_min_level() {
        Ok(l) => l.to_ascii_lowercase(),
        Err(_) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = tilawaconfig::get_config()?;
    init_logging(&config);

    let surah: u16 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(1);

    let reciter = config.reciter();
    let keys = VerseKey::surah_keys(surah)?;
    let verses = reciter.surah_candidates(surah)?;

    let coordinator =
        AudioCoordinator::with_policy(Arc::new(HttpStreamBackend::new()), config.notify_policy());

    let (end_tx, mut end_rx) = mpsc::unbounded_channel();
    let mut events = coordinator.subscribe_events();
    let advance = AutoAdvance::with_candidates(verses.clone())
        .with_delay(config.auto_advance_delay())
        .with_attempt_timeout(config.fallback_timeout())
        .on_advance(move |index| info!(verse = %keys[index], "Next verse"))
        .on_end(move |end| {
            let _ = end_tx.send(end);
        })
        .activate(&coordinator, config.clone());

    let player = FallbackPlayer::new(coordinator.clone())
        .with_attempt_timeout(config.fallback_timeout());
    let Some(first) = verses.first() else {
        anyhow::bail!("surah {surah} has no verses");
    };
    let played = player.play(first).await?;
    info!(source = %played, reciter = reciter.name(), "Recitation started");

    if !advance.is_active() {
        // Auto-play is off: recite the first verse only
        loop {
            match events.recv().await {
                Ok(PlaybackEvent::Completed { source }) if source == played => break,
                Ok(PlaybackEvent::Failed { source, error }) if source == played => {
                    warn!(source = %source, error = %error, "Playback failed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Event stream interrupted");
                    break;
                }
            }
        }
        return Ok(());
    }

    match end_rx.recv().await {
        Some(AdvanceEnd::Finished) => info!(surah, "Recitation finished"),
        Some(AdvanceEnd::Unavailable { index }) => {
            warn!(surah, ayah = index + 1, "Audio unavailable for this verse")
        }
        Some(end) => info!(surah, reason = ?end, "Recitation stopped"),
        None => warn!(surah, "Auto-advance stopped unexpectedly"),
    }

    Ok(())
}
