// libs/video-conferencing-cell/src/services/transport.rs
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{
    ChatEnvelope, ChatRole, ConnectOptions, RemoteParticipantInfo, RoomEvent, TrackEvent,
    TrackKind, VideoConferencingError,
};

// ==============================================================================
// MEDIA TRANSPORT SEAM
// ==============================================================================

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn connect(
        &self,
        token: &str,
        room_name: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn MediaRoom>, VideoConferencingError>;
}

/// A connected room. Events are delivered through broadcast receivers so
/// each subscriber owns its own cursor.
#[async_trait]
pub trait MediaRoom: Send + Sync {
    fn name(&self) -> &str;

    /// Participants already present, with the tracks each has published so
    /// far. Must reflect track events already sent to `participant_events`
    /// receivers, since late subscribers are seeded from it.
    fn remote_participants(&self) -> Vec<RemoteParticipantInfo>;

    fn room_events(&self) -> broadcast::Receiver<RoomEvent>;

    fn participant_events(&self, participant_id: &str) -> broadcast::Receiver<TrackEvent>;

    async fn create_local_track(
        &self,
        kind: TrackKind,
    ) -> Result<Arc<dyn LocalTrack>, VideoConferencingError>;

    async fn publish_track(&self, track: &Arc<dyn LocalTrack>) -> Result<(), VideoConferencingError>;

    async fn unpublish_track(
        &self,
        track: &Arc<dyn LocalTrack>,
    ) -> Result<(), VideoConferencingError>;

    async fn disconnect(&self);
}

impl std::fmt::Debug for dyn MediaRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRoom").field("name", &self.name()).finish()
    }
}

/// Camera or microphone capture owned by the local participant.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Release the capture device.
    fn stop(&self);
}

// ==============================================================================
// CHAT TRANSPORT SEAM
// ==============================================================================

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(
        &self,
        chat_id: &str,
        role: ChatRole,
    ) -> Result<Arc<dyn ChatChannel>, VideoConferencingError>;
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    async fn publish(&self, envelope: ChatEnvelope) -> Result<(), VideoConferencingError>;
    fn subscribe(&self) -> broadcast::Receiver<ChatEnvelope>;
    async fn close(&self);
}

// ==============================================================================
// SUBSCRIPTION HANDLE
// ==============================================================================

/// Owns a spawned event pump. Dropping or unsubscribing cancels it.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F, Fut>(pump: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(CancellationToken::new(), pump)
    }

    pub fn spawn_with<F, Fut>(cancel: CancellationToken, pump: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(pump(cancel.clone()));
        Self { cancel, task }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
