// libs/video-conferencing-cell/src/services/media.rs
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{
    ConnectOptions, ConnectionState, MediaState, PresenceState, RemoteParticipantState,
    RoomEvent, TrackEvent, TrackKind, VideoConferencingError,
};
use crate::services::presence::PresenceTracker;
use crate::services::transport::{LocalTrack, MediaRoom, MediaTransport, Subscription};

/// Owns the media room for one consultation: local capture tracks, remote
/// participant track references and the per-participant event pumps.
///
/// All observable state is published through a `watch` channel. Every
/// resource acquired here (tracks, subscriptions, the room itself) is
/// released by [`MediaSessionManager::disconnect`], including resources a
/// connect still in flight acquires after the disconnect was requested.
pub struct MediaSessionManager {
    shared: Arc<MediaShared>,
}

struct MediaShared {
    transport: Arc<dyn MediaTransport>,
    state: watch::Sender<MediaState>,
    presence: PresenceTracker,
    session: Mutex<SessionResources>,
}

#[derive(Default)]
struct SessionResources {
    room: Option<Arc<dyn MediaRoom>>,
    connecting: Option<CancellationToken>,
    local_tracks: HashMap<TrackKind, Arc<dyn LocalTrack>>,
    toggling: HashSet<TrackKind>,
    room_events: Option<Subscription>,
    participant_events: HashMap<String, Subscription>,
}

impl MediaSessionManager {
    pub fn new(transport: Arc<dyn MediaTransport>, config: &AppConfig) -> Self {
        let (state, _) = watch::channel(MediaState::default());
        Self {
            shared: Arc::new(MediaShared {
                transport,
                state,
                presence: PresenceTracker::new(Duration::from_millis(
                    config.presence_grace_period_ms,
                )),
                session: Mutex::new(SessionResources::default()),
            }),
        }
    }

    pub fn state(&self) -> MediaState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.shared.state.subscribe()
    }

    pub fn presence(&self) -> PresenceState {
        self.shared.presence.state()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<PresenceState> {
        self.shared.presence.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session().room.is_some()
    }

    pub fn room(&self) -> Option<Arc<dyn MediaRoom>> {
        self.shared.session().room.clone()
    }

    pub fn local_track(&self, kind: TrackKind) -> Option<Arc<dyn LocalTrack>> {
        self.shared.session().local_tracks.get(&kind).cloned()
    }

    pub fn remote_participant(&self, participant_id: &str) -> Option<RemoteParticipantState> {
        self.shared.state.borrow().participants.get(participant_id).cloned()
    }

    /// Join `room_name`. Already connected returns the current room; a
    /// second caller while a connect is pending gets `ConnectInProgress`.
    pub async fn connect(
        &self,
        token: &str,
        room_name: &str,
        options: ConnectOptions,
    ) -> Result<Arc<dyn MediaRoom>, VideoConferencingError> {
        let cancel = {
            let mut session = self.shared.session();
            if let Some(room) = &session.room {
                debug!("Already connected to media room {}", room.name());
                return Ok(room.clone());
            }
            if session.connecting.is_some() {
                return Err(VideoConferencingError::ConnectInProgress);
            }

            let cancel = CancellationToken::new();
            session.connecting = Some(cancel.clone());
            self.shared.state.send_modify(|state| {
                state.connection = ConnectionState::Connecting;
                state.room_name = Some(room_name.to_string());
            });
            cancel
        };

        info!("Connecting to media room {}", room_name);

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.shared.transport.connect(token, room_name, &options) => Some(result),
        };

        let room = match connected {
            None => {
                info!("Connect to media room {} cancelled", room_name);
                return Err(VideoConferencingError::ConnectCancelled);
            }
            Some(Err(e)) => {
                error!("Failed to connect to media room {}: {}", room_name, e);
                self.shared.fail_connect(&cancel);
                return Err(e);
            }
            Some(Ok(room)) => room,
        };

        let mut tracks = Vec::new();
        for kind in options.kinds() {
            if cancel.is_cancelled() {
                break;
            }
            match acquire_track(&room, kind).await {
                Ok(track) => tracks.push(track),
                Err(e) => warn!("Continuing without local {} track: {}", kind, e),
            }
        }

        // Subscribe before snapshotting so no join falls between the two.
        let room_events = room.room_events();
        let participants = room.remote_participants();

        let adopted = {
            let mut session = self.shared.session();
            if cancel.is_cancelled() {
                false
            } else {
                session.connecting = None;
                session.room = Some(room.clone());
                for track in &tracks {
                    session.local_tracks.insert(track.kind(), track.clone());
                }

                self.shared.state.send_modify(|state| {
                    state.connection = ConnectionState::Connected;
                    state.room_name = Some(room.name().to_string());
                    for track in &tracks {
                        state.set_local_enabled(track.kind(), track.is_enabled());
                    }
                    state.participants = participants
                        .iter()
                        .map(|info| (info.id.clone(), RemoteParticipantState::from_info(info)))
                        .collect::<BTreeMap<_, _>>();
                });

                session.room_events = Some(self.shared.spawn_room_pump(room.clone(), room_events));
                for info in &participants {
                    let pump = self.shared.spawn_participant_pump(&room, &info.id);
                    session.participant_events.insert(info.id.clone(), pump);
                }
                true
            }
        };

        if !adopted {
            info!(
                "Connect to media room {} superseded by disconnect, releasing {} tracks",
                room_name,
                tracks.len()
            );
            release_tracks(&room, &tracks).await;
            room.disconnect().await;
            return Err(VideoConferencingError::ConnectCancelled);
        }

        self.shared.presence.on_participant_count(participants.len());
        info!(
            "Connected to media room {} with {} remote participants",
            room.name(),
            participants.len()
        );
        Ok(room)
    }

    /// Leave the room and release every track and subscription. Safe to
    /// call at any time, including while a connect is pending.
    pub async fn disconnect(&self) {
        let (room, tracks, subscriptions) = {
            let mut session = self.shared.session();
            if let Some(cancel) = session.connecting.take() {
                info!("Cancelling in-flight media connect");
                cancel.cancel();
            }

            let tracks: Vec<_> = session.local_tracks.drain().map(|(_, track)| track).collect();
            let mut subscriptions: Vec<_> = session
                .participant_events
                .drain()
                .map(|(_, subscription)| subscription)
                .collect();
            subscriptions.extend(session.room_events.take());

            self.shared.state.send_replace(MediaState::default());
            (session.room.take(), tracks, subscriptions)
        };

        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.shared.presence.reset();

        match room {
            Some(room) => {
                release_tracks(&room, &tracks).await;
                room.disconnect().await;
                info!("Disconnected from media room {}", room.name());
            }
            None => {
                for track in &tracks {
                    track.stop();
                }
            }
        }
    }

    pub async fn toggle_camera(&self) -> Result<bool, VideoConferencingError> {
        self.toggle(TrackKind::Video).await
    }

    pub async fn toggle_microphone(&self) -> Result<bool, VideoConferencingError> {
        self.toggle(TrackKind::Audio).await
    }

    /// Flip the local track of `kind`, creating and publishing it on first
    /// use. Returns the resulting enabled flag.
    async fn toggle(&self, kind: TrackKind) -> Result<bool, VideoConferencingError> {
        let room = {
            let mut session = self.shared.session();
            let room = session
                .room
                .clone()
                .ok_or(VideoConferencingError::NotConnected)?;

            if session.toggling.contains(&kind) {
                return Err(VideoConferencingError::OperationInProgress {
                    operation: format!("{} toggle", kind),
                });
            }

            if let Some(track) = session.local_tracks.get(&kind) {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                self.shared
                    .state
                    .send_modify(|state| state.set_local_enabled(kind, enabled));
                debug!("Local {} track enabled: {}", kind, enabled);
                return Ok(enabled);
            }

            session.toggling.insert(kind);
            room
        };

        let _guard = ToggleGuard {
            shared: &self.shared,
            kind,
        };

        let track = acquire_track(&room, kind).await?;

        let adopted = {
            let mut session = self.shared.session();
            let current = session.room.as_ref().is_some_and(|r| same_room(r, &room));
            if current {
                track.set_enabled(true);
                session.local_tracks.insert(kind, track.clone());
                self.shared
                    .state
                    .send_modify(|state| state.set_local_enabled(kind, true));
            }
            current
        };

        if !adopted {
            warn!("Room closed while publishing local {} track", kind);
            release_tracks(&room, &[track]).await;
            return Err(VideoConferencingError::NotConnected);
        }

        info!("Published local {} track", kind);
        Ok(true)
    }
}

impl MediaShared {
    fn session(&self) -> MutexGuard<'_, SessionResources> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_connect(&self, cancel: &CancellationToken) {
        let mut session = self.session();
        if cancel.is_cancelled() {
            return;
        }
        session.connecting = None;
        self.state.send_modify(|state| {
            state.connection = ConnectionState::Failed;
        });
    }

    fn spawn_room_pump(
        self: &Arc<Self>,
        room: Arc<dyn MediaRoom>,
        mut events: broadcast::Receiver<RoomEvent>,
    ) -> Subscription {
        let shared = Arc::downgrade(self);
        Subscription::spawn(move |cancel| async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let Some(shared) = shared.upgrade() else { break };
                        let dropped = matches!(event, RoomEvent::Disconnected { .. });
                        shared.apply_room_event(&room, event);
                        if dropped {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Room event stream lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Room event stream closed");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_participant_pump(
        self: &Arc<Self>,
        room: &Arc<dyn MediaRoom>,
        participant_id: &str,
    ) -> Subscription {
        let mut events = room.participant_events(participant_id);
        let participant_id = participant_id.to_string();
        let shared = Arc::downgrade(self);
        Subscription::spawn(move |cancel| async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let Some(shared) = shared.upgrade() else { break };
                        shared.apply_track_event(&participant_id, &event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Track events for {} lagged, skipped {} events",
                            participant_id, skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply_room_event(self: &Arc<Self>, room: &Arc<dyn MediaRoom>, event: RoomEvent) {
        match event {
            RoomEvent::ParticipantConnected(info) => {
                let count = {
                    let mut session = self.session();
                    if !session.room.as_ref().is_some_and(|r| same_room(r, room)) {
                        return;
                    }
                    let subscribed = !session.participant_events.contains_key(&info.id);
                    if subscribed {
                        let pump = self.spawn_participant_pump(room, &info.id);
                        session.participant_events.insert(info.id.clone(), pump);
                    }

                    // Tracks published between the join and the subscription
                    // only show up in the room's snapshot. It is read under the
                    // state lock so the pump cannot apply a newer event first.
                    let mut count = 0;
                    self.state.send_modify(|state| {
                        if subscribed {
                            let current = room
                                .remote_participants()
                                .into_iter()
                                .find(|p| p.id == info.id)
                                .unwrap_or_else(|| info.clone());
                            state
                                .participants
                                .insert(info.id.clone(), RemoteParticipantState::from_info(&current));
                        } else {
                            state
                                .participants
                                .entry(info.id.clone())
                                .or_insert_with(|| RemoteParticipantState::from_info(&info));
                        }
                        count = state.remote_count();
                    });
                    count
                };
                info!("Participant {} joined room {}", info.id, room.name());
                self.presence.on_participant_count(count);
            }
            RoomEvent::ParticipantDisconnected { participant_id } => {
                let count = {
                    let mut session = self.session();
                    if !session.room.as_ref().is_some_and(|r| same_room(r, room)) {
                        return;
                    }
                    if let Some(pump) = session.participant_events.remove(&participant_id) {
                        pump.unsubscribe();
                    }

                    let mut count = 0;
                    self.state.send_modify(|state| {
                        state.participants.remove(&participant_id);
                        count = state.remote_count();
                    });
                    count
                };
                info!("Participant {} left room {}", participant_id, room.name());
                self.presence.on_participant_count(count);
            }
            RoomEvent::Disconnected { reason } => {
                let tracks = {
                    let mut session = self.session();
                    if !session.room.as_ref().is_some_and(|r| same_room(r, room)) {
                        return;
                    }
                    session.room = None;
                    for (_, pump) in session.participant_events.drain() {
                        pump.unsubscribe();
                    }
                    if let Some(pump) = session.room_events.take() {
                        pump.unsubscribe();
                    }

                    self.state.send_modify(|state| {
                        state.connection = ConnectionState::Lost;
                        state.camera_enabled = false;
                        state.microphone_enabled = false;
                        state.participants.clear();
                    });
                    session.local_tracks.drain().map(|(_, t)| t).collect::<Vec<_>>()
                };

                warn!(
                    "Media room {} dropped: {}",
                    room.name(),
                    reason.as_deref().unwrap_or("no reason given")
                );
                for track in tracks {
                    track.stop();
                }
                self.presence.on_participant_count(0);
            }
        }
    }

    fn apply_track_event(&self, participant_id: &str, event: &TrackEvent) {
        let changed = self.state.send_if_modified(|state| {
            match state.participants.get_mut(participant_id) {
                Some(participant) => {
                    let before = participant.clone();
                    participant.apply(event);
                    *participant != before
                }
                None => false,
            }
        });
        if changed {
            debug!("Track update for {}: {:?}", participant_id, event);
        }
    }
}

struct ToggleGuard<'a> {
    shared: &'a MediaShared,
    kind: TrackKind,
}

impl Drop for ToggleGuard<'_> {
    fn drop(&mut self) {
        self.shared.session().toggling.remove(&self.kind);
    }
}

async fn acquire_track(
    room: &Arc<dyn MediaRoom>,
    kind: TrackKind,
) -> Result<Arc<dyn LocalTrack>, VideoConferencingError> {
    let track = room.create_local_track(kind).await.map_err(|e| match e {
        e @ VideoConferencingError::TrackUnavailable { .. } => e,
        other => VideoConferencingError::TrackUnavailable {
            kind,
            message: other.to_string(),
        },
    })?;

    if let Err(e) = room.publish_track(&track).await {
        track.stop();
        return Err(e);
    }
    debug!("Created and published local {} track {}", kind, track.id());
    Ok(track)
}

async fn release_tracks(room: &Arc<dyn MediaRoom>, tracks: &[Arc<dyn LocalTrack>]) {
    for track in tracks {
        track.stop();
        if let Err(e) = room.unpublish_track(track).await {
            warn!("Failed to unpublish local {} track: {}", track.kind(), e);
        }
    }
}

fn same_room(a: &Arc<dyn MediaRoom>, b: &Arc<dyn MediaRoom>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
