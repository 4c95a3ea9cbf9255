//! Affect decay publisher.
//!
//! Souls keep living between messages: every few seconds each online
//! terminal's soul takes a zero-input persona step (boredom builds,
//! shock fades, PAD relaxes toward its personality baseline) and the
//! fresh snapshot is pushed to the terminal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use animus_core::types::DECAY_SESSION_ID;
use animus_persona::EmotionSignal;

use crate::orchestrator::ChatOrchestrator;

const MIN_TICK_SECS: u64 = 2;
const MAX_TICK_SECS: u64 = 5;

pub async fn run_decay_publisher(
    orchestrator: Arc<ChatOrchestrator>,
    tick_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let tick = tick_secs.clamp(MIN_TICK_SECS, MAX_TICK_SECS);
    let mut interval = tokio::time::interval(Duration::from_secs(tick));
    info!(tick_secs = tick, "decay publisher started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick_once(&orchestrator).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("decay publisher shutting down");
                    break;
                }
            }
        }
    }
}

/// One decay sweep over every online terminal with a bound soul.
/// Per-terminal failures are logged and do not block the rest.
pub async fn tick_once(orchestrator: &ChatOrchestrator) {
    for (terminal_id, soul_id) in orchestrator.registry().list_online_states() {
        let neutral = EmotionSignal::neutral();
        match orchestrator
            .advance_affect(&soul_id, neutral.clone(), false)
            .await
        {
            Ok((_, updated)) => {
                orchestrator
                    .publish_affect(&terminal_id, &soul_id, DECAY_SESSION_ID, &neutral, &updated)
                    .await;
            }
            Err(e) => {
                warn!(terminal_id, soul_id = %soul_id, error = %e, "decay step failed");
            }
        }
    }
}
