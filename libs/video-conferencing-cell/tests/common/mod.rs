// libs/video-conferencing-cell/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};

use appointment_cell::{ConsultationId, ConsultationStatus, ConsultationSummary};
use shared_config::AppConfig;
use shared_utils::test_utils::{at, TestConfig};
use video_conferencing_cell::{
    ChatChannel, ChatEnvelope, ChatMessage, ChatRole, ChatTransport, LocalTrack, MediaRoom,
    MediaTransport, NavigationHandler, RemoteParticipantInfo, RemoteParticipantState, RemoteTrack,
    RoomEvent, TrackEvent, TrackKind, VideoConferencingError,
};

pub fn config() -> AppConfig {
    TestConfig::default().to_app_config()
}

/// Wait until `predicate` holds for the watched value.
pub async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed")
        .clone()
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

pub fn remote(sid: &str, kind: TrackKind) -> RemoteTrack {
    RemoteTrack {
        sid: sid.to_string(),
        kind,
        enabled: true,
    }
}

// ==============================================================================
// MEDIA FAKES
// ==============================================================================

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }
}

pub struct FakeRoom {
    name: String,
    participants: Mutex<Vec<RemoteParticipantInfo>>,
    room_tx: broadcast::Sender<RoomEvent>,
    participant_tx: Mutex<HashMap<String, broadcast::Sender<TrackEvent>>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    published: Mutex<HashSet<String>>,
    track_requests: AtomicUsize,
    track_gate: Option<Arc<Semaphore>>,
    denied: HashSet<TrackKind>,
    disconnected: AtomicBool,
}

impl FakeRoom {
    fn new(
        name: &str,
        participants: Vec<RemoteParticipantInfo>,
        track_gate: Option<Arc<Semaphore>>,
        denied: HashSet<TrackKind>,
    ) -> Self {
        let (room_tx, _) = broadcast::channel(64);
        Self {
            name: name.to_string(),
            participants: Mutex::new(participants),
            room_tx,
            participant_tx: Mutex::new(HashMap::new()),
            tracks: Mutex::new(Vec::new()),
            published: Mutex::new(HashSet::new()),
            track_requests: AtomicUsize::new(0),
            track_gate,
            denied,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn join(&self, participant_id: &str, tracks: Vec<RemoteTrack>) {
        let info = RemoteParticipantInfo {
            id: participant_id.to_string(),
            tracks,
        };
        self.participants.lock().unwrap().push(info.clone());
        let _ = self.room_tx.send(RoomEvent::ParticipantConnected(info));
    }

    pub fn leave(&self, participant_id: &str) {
        self.participants
            .lock()
            .unwrap()
            .retain(|p| p.id != participant_id);
        let _ = self.room_tx.send(RoomEvent::ParticipantDisconnected {
            participant_id: participant_id.to_string(),
        });
    }

    /// Update the room's own view of the participant, then notify subscribers.
    pub fn track_event(&self, participant_id: &str, event: TrackEvent) {
        if let Some(info) = self
            .participants
            .lock()
            .unwrap()
            .iter_mut()
            .find(|p| p.id == participant_id)
        {
            let mut current = RemoteParticipantState::from_info(info);
            current.apply(&event);
            info.tracks = current.audio.into_iter().chain(current.video).collect();
        }
        let _ = self.sender_for(participant_id).send(event);
    }

    pub fn drop_connection(&self) {
        let _ = self.room_tx.send(RoomEvent::Disconnected {
            reason: Some("network lost".to_string()),
        });
    }

    /// Local tracks created and not yet stopped.
    pub fn active_tracks(&self) -> usize {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_stopped())
            .count()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn track_requests(&self) -> usize {
        self.track_requests.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn sender_for(&self, participant_id: &str) -> broadcast::Sender<TrackEvent> {
        self.participant_tx
            .lock()
            .unwrap()
            .entry(participant_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl MediaRoom for FakeRoom {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_participants(&self) -> Vec<RemoteParticipantInfo> {
        self.participants.lock().unwrap().clone()
    }

    fn room_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.room_tx.subscribe()
    }

    fn participant_events(&self, participant_id: &str) -> broadcast::Receiver<TrackEvent> {
        self.sender_for(participant_id).subscribe()
    }

    async fn create_local_track(
        &self,
        kind: TrackKind,
    ) -> Result<Arc<dyn LocalTrack>, VideoConferencingError> {
        let n = self.track_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.track_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.denied.contains(&kind) {
            return Err(VideoConferencingError::TrackUnavailable {
                kind,
                message: "permission denied".to_string(),
            });
        }

        let track = Arc::new(FakeTrack {
            id: format!("local-{}-{}", kind, n),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        self.tracks.lock().unwrap().push(track.clone());
        Ok(track)
    }

    async fn publish_track(&self, track: &Arc<dyn LocalTrack>) -> Result<(), VideoConferencingError> {
        self.published.lock().unwrap().insert(track.id().to_string());
        Ok(())
    }

    async fn unpublish_track(
        &self,
        track: &Arc<dyn LocalTrack>,
    ) -> Result<(), VideoConferencingError> {
        self.published.lock().unwrap().remove(track.id());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeMediaTransport {
    rooms: Mutex<Vec<Arc<FakeRoom>>>,
    participants: Mutex<Vec<RemoteParticipantInfo>>,
    connect_calls: AtomicUsize,
    connect_gate: Mutex<Option<Arc<Semaphore>>>,
    track_gate: Mutex<Option<Arc<Semaphore>>>,
    denied: Mutex<HashSet<TrackKind>>,
    fail: AtomicBool,
}

impl FakeMediaTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Participants already in the room when we connect.
    pub fn with_participant(self: Arc<Self>, id: &str, tracks: Vec<RemoteTrack>) -> Arc<Self> {
        self.participants.lock().unwrap().push(RemoteParticipantInfo {
            id: id.to_string(),
            tracks,
        });
        self
    }

    pub fn gate_connect(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Applies to rooms created after the call.
    pub fn gate_tracks(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.track_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn deny(&self, kind: TrackKind) {
        self.denied.lock().unwrap().insert(kind);
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    pub fn last_room(&self) -> Arc<FakeRoom> {
        self.rooms
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no room connected")
    }
}

#[async_trait]
impl MediaTransport for FakeMediaTransport {
    async fn connect(
        &self,
        _token: &str,
        room_name: &str,
        _options: &video_conferencing_cell::ConnectOptions,
    ) -> Result<Arc<dyn MediaRoom>, VideoConferencingError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(VideoConferencingError::Transport {
                message: "sfu unreachable".to_string(),
            });
        }

        let room = Arc::new(FakeRoom::new(
            room_name,
            self.participants.lock().unwrap().clone(),
            self.track_gate.lock().unwrap().clone(),
            self.denied.lock().unwrap().clone(),
        ));
        self.rooms.lock().unwrap().push(room.clone());
        Ok(room)
    }
}

// ==============================================================================
// CHAT FAKES
// ==============================================================================

/// In-memory relay shared by every channel opened through it.
#[derive(Default)]
pub struct FakeChatHub {
    channels: Mutex<HashMap<String, broadcast::Sender<ChatEnvelope>>>,
    published: Mutex<Vec<ChatEnvelope>>,
    closed: AtomicUsize,
    opens: AtomicUsize,
    open_gate: Mutex<Option<Arc<Semaphore>>>,
    fail: AtomicBool,
}

impl FakeChatHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Channel opens block until the returned semaphore gets a permit.
    pub fn gate_open(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.open_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn open_attempts(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn inject(&self, envelope: ChatEnvelope) {
        let _ = self.sender(&envelope.chat_id).send(envelope);
    }

    /// Drop the relay for `chat_id`; open receivers observe closure.
    pub fn sever(&self, chat_id: &str) {
        self.channels.lock().unwrap().remove(chat_id);
    }

    pub fn published(&self) -> Vec<ChatEnvelope> {
        self.published.lock().unwrap().clone()
    }

    pub fn closed_channels(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn sender(&self, chat_id: &str) -> broadcast::Sender<ChatEnvelope> {
        self.channels
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

pub struct FakeChatChannel {
    hub: Arc<FakeChatHub>,
    chat_id: String,
    closed: AtomicBool,
}

#[async_trait]
impl ChatChannel for FakeChatChannel {
    async fn publish(&self, envelope: ChatEnvelope) -> Result<(), VideoConferencingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VideoConferencingError::ChatUnavailable {
                message: "channel closed".to_string(),
            });
        }
        self.hub.published.lock().unwrap().push(envelope.clone());
        let _ = self.hub.sender(&self.chat_id).send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEnvelope> {
        self.hub.sender(&self.chat_id).subscribe()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeChatTransport {
    hub: Arc<FakeChatHub>,
}

impl FakeChatTransport {
    pub fn new(hub: &Arc<FakeChatHub>) -> Arc<Self> {
        Arc::new(Self { hub: hub.clone() })
    }
}

#[async_trait]
impl ChatTransport for FakeChatTransport {
    async fn open(
        &self,
        chat_id: &str,
        _role: ChatRole,
    ) -> Result<Arc<dyn ChatChannel>, VideoConferencingError> {
        self.hub.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.hub.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.hub.fail.load(Ordering::SeqCst) {
            return Err(VideoConferencingError::Transport {
                message: "realtime unavailable".to_string(),
            });
        }
        // register the relay before anyone publishes
        self.hub.sender(chat_id);
        Ok(Arc::new(FakeChatChannel {
            hub: self.hub.clone(),
            chat_id: chat_id.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Forward every delivered message into a channel the test can await.
pub fn collect_messages(
    bridge: &video_conferencing_cell::SessionChatBridge,
) -> (
    video_conferencing_cell::ListenerHandle,
    mpsc::UnboundedReceiver<ChatMessage>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = bridge.on_receive(move |message| {
        let _ = tx.send(message.clone());
    });
    (handle, rx)
}

// ==============================================================================
// CONTROLLER FIXTURES
// ==============================================================================

/// Records navigation and whether media was already released at that point.
pub struct RecordingNavigation {
    transport: Arc<FakeMediaTransport>,
    pub calls: Mutex<Vec<(ConsultationId, bool)>>,
}

impl RecordingNavigation {
    pub fn new(transport: &Arc<FakeMediaTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport: transport.clone(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(ConsultationId, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl NavigationHandler for RecordingNavigation {
    fn leave_session(&self, consultation_id: ConsultationId) {
        let released = self.transport.room_count() == 0 || {
            let room = self.transport.last_room();
            room.is_disconnected() && room.active_tracks() == 0
        };
        self.calls.lock().unwrap().push((consultation_id, released));
    }
}

pub fn consultation() -> ConsultationSummary {
    ConsultationSummary {
        id: ConsultationId(42),
        provider_id: "provider-1".to_string(),
        provider_name: "Dr. Aigerim Sadykova".to_string(),
        start: at("2024-06-06T18:00:00Z"),
        end: at("2024-06-06T19:00:00Z"),
        chat_id: "chat-42".to_string(),
        status: ConsultationStatus::Scheduled,
    }
}
