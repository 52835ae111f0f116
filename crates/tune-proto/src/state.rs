use crate::protocol::{EngineHealth, RepeatMode, SessionState, TransportStatus};
use crate::track::Track;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owner of the live playback session.  Lives only as long as the daemon
/// process; nothing here is written to disk.
///
/// Mutators that feed the now-playing notification return whether they
/// changed anything, so the caller can refresh exactly once per transition.
pub struct StateManager {
    state: Arc<RwLock<SessionState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let state = SessionState {
            rev: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Replace the session wholesale.  No merge with the previous queue.
    pub async fn load_queue(&self, tracks: Vec<Track>, start_index: usize) {
        let mut state = self.state.write().await;
        state.current_index = if start_index < tracks.len() {
            Some(start_index)
        } else {
            None
        };
        state.queue = tracks;
        state.status = TransportStatus::Preparing;
        state.position_ms = 0;
        state.duration_ms = 0;
        state.last_error = None;
        state.rev += 1;
    }

    pub async fn set_status(&self, status: TransportStatus) -> bool {
        let mut state = self.state.write().await;
        if state.status == status {
            return false;
        }
        state.status = status;
        state.rev += 1;
        true
    }

    pub async fn set_current_index(&self, index: Option<usize>) -> bool {
        let mut state = self.state.write().await;
        if state.current_index == index {
            return false;
        }
        state.current_index = index;
        state.position_ms = 0;
        state.duration_ms = 0;
        state.rev += 1;
        true
    }

    pub async fn set_shuffle(&self, shuffle: bool) {
        let mut state = self.state.write().await;
        state.shuffle = shuffle;
        state.rev += 1;
    }

    pub async fn set_repeat(&self, repeat: RepeatMode) {
        let mut state = self.state.write().await;
        state.repeat = repeat;
        state.rev += 1;
    }

    pub async fn set_position(&self, position_ms: u64) {
        let mut state = self.state.write().await;
        state.position_ms = position_ms;
        state.rev += 1;
    }

    pub async fn set_duration(&self, duration_ms: u64) {
        let mut state = self.state.write().await;
        state.duration_ms = duration_ms;
        state.rev += 1;
    }

    pub async fn set_engine_health(&self, health: EngineHealth) {
        let mut state = self.state.write().await;
        if state.engine_health != health {
            state.engine_health = health;
            state.rev += 1;
        }
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut state = self.state.write().await;
        state.last_error = error;
        state.rev += 1;
    }

    /// Back to an empty, idle session.  Shuffle and repeat survive a stop.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.queue.clear();
        state.current_index = None;
        state.status = TransportStatus::Idle;
        state.position_ms = 0;
        state.duration_ms = 0;
        state.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                title: format!("t{}", i),
                path: format!("/music/{}.flac", i),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_load_queue_replaces_previous_session() {
        let sm = StateManager::new();
        sm.load_queue(tracks(5), 4).await;
        sm.set_status(TransportStatus::Playing).await;

        sm.load_queue(tracks(2), 1).await;
        let state = sm.get_state().await;
        assert_eq!(state.queue.len(), 2);
        assert_eq!(state.current_index, Some(1));
        assert_eq!(state.status, TransportStatus::Preparing);
    }

    #[tokio::test]
    async fn test_out_of_range_start_has_no_current_track() {
        let sm = StateManager::new();
        sm.load_queue(tracks(2), 7).await;
        assert!(sm.get_state().await.current_track().is_none());
    }

    #[tokio::test]
    async fn test_set_status_reports_change_once() {
        let sm = StateManager::new();
        let rev = sm.get_state().await.rev;
        assert!(sm.set_status(TransportStatus::Playing).await);
        assert!(!sm.set_status(TransportStatus::Playing).await);
        assert_eq!(sm.get_state().await.rev, rev + 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_modes() {
        let sm = StateManager::new();
        sm.load_queue(tracks(3), 0).await;
        sm.set_shuffle(true).await;
        sm.set_repeat(RepeatMode::All).await;
        sm.clear().await;
        let state = sm.get_state().await;
        assert!(state.queue.is_empty());
        assert!(state.shuffle);
        assert_eq!(state.repeat, RepeatMode::All);
        assert_eq!(state.status, TransportStatus::Idle);
    }
}
