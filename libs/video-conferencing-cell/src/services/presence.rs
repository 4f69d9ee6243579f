// libs/video-conferencing-cell/src/services/presence.rs
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::PresenceState;

/// Tracks whether the other party is in the room. A drop to zero remote
/// participants only becomes `Absent` after the grace period, so a brief
/// reconnect does not flicker the UI.
pub struct PresenceTracker {
    state: Arc<watch::Sender<PresenceState>>,
    grace: Duration,
    timer: Mutex<Option<CancellationToken>>,
}

impl PresenceTracker {
    pub fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(PresenceState::Absent);
        Self {
            state: Arc::new(state),
            grace,
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PresenceState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    /// Feed the current remote participant count.
    pub fn on_participant_count(&self, count: usize) {
        if count > 0 {
            self.cancel_timer();
            self.state.send_if_modified(|state| {
                let changed = *state != PresenceState::Present;
                *state = PresenceState::Present;
                changed
            });
            return;
        }

        if self.state() != PresenceState::Present {
            return;
        }

        if self.grace.is_zero() {
            self.state.send_replace(PresenceState::Absent);
            return;
        }

        debug!("Remote participants left, holding presence for {:?}", self.grace);
        self.state.send_replace(PresenceState::Reconnecting);

        let cancel = CancellationToken::new();
        if let Some(previous) = self.timer().replace(cancel.clone()) {
            previous.cancel();
        }

        let state = self.state.clone();
        let deadline = tokio::time::Instant::now() + self.grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    state.send_if_modified(|state| {
                        if *state == PresenceState::Reconnecting {
                            *state = PresenceState::Absent;
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        });
    }

    pub fn reset(&self) {
        self.cancel_timer();
        self.state.send_replace(PresenceState::Absent);
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer().take() {
            timer.cancel();
        }
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
