//! Liveness probing for the socket connector.
//!
//! Pings go out every interval. Any inbound frame counts as proof of life.
//! When nothing has arrived for `interval * miss_limit`, the connection is
//! declared dead and torn down so the owner can reconnect.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Shared;

/// When the last inbound frame was seen.
#[derive(Debug)]
pub(crate) struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record an inbound frame.
    pub(crate) fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last inbound frame.
    pub(crate) fn silence(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// Run until cancelled, the writer goes away, or the peer falls silent.
pub(super) async fn run(
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    generation: u64,
) {
    let interval = shared.settings.heartbeat_interval;
    let limit = interval.saturating_mul(shared.settings.heartbeat_miss_limit);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    debug!(?interval, ?limit, generation, "Heartbeat started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {},
        }

        let silence = shared.liveness.silence();
        if silence > limit {
            warn!(?silence, ?limit, generation, "Peer silent, dropping connection");
            shared.lost(generation, "heartbeat missed");
            return;
        }
        trace!(generation, "Ping");
        if outbound.send(Message::Ping(Vec::new().into())).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_silence() {
        let liveness = Liveness::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(liveness.silence() >= Duration::from_secs(5));
        liveness.touch();
        assert!(liveness.silence() < Duration::from_secs(1));
    }
}
