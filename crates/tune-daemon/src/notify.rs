use tokio::sync::broadcast;
use tracing::info;
use tune_proto::protocol::{NowPlaying, SessionState};

use crate::BroadcastMessage;

/// The daemon's stand-in for a foreground "now playing" notification:
/// title, artist and a play/pause button, pushed to every attached client.
///
/// The coordinator calls `refresh` once per transport or track change; this
/// type does no deduplication of its own.
pub struct NowPlayingPublisher {
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    refreshes: u64,
}

impl NowPlayingPublisher {
    pub fn new(broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            broadcast_tx,
            refreshes: 0,
        }
    }

    pub fn refresh(&mut self, state: &SessionState) {
        let notification = NowPlaying::from_state(state);
        match &notification {
            Some(n) => info!(
                "now playing: {} - {} [{:?}]",
                n.title, n.artist, n.icon
            ),
            None => info!("now playing: cleared"),
        }
        self.refreshes += 1;
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::NowPlaying(notification));
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes
    }
}
