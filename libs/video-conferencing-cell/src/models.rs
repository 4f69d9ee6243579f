// libs/video-conferencing-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use appointment_cell::ConsultationId;

// ==============================================================================
// MEDIA DOMAIN MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub video: bool,
    pub audio: bool,
}

impl ConnectOptions {
    pub fn audio_video() -> Self {
        Self { video: true, audio: true }
    }

    pub fn muted() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

/// A remote participant's published track, observed but not owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipantInfo {
    pub id: String,
    #[serde(default)]
    pub tracks: Vec<RemoteTrack>,
}

/// Per-participant track notifications, in publish-then-unpublish order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Published(RemoteTrack),
    Subscribed(RemoteTrack),
    Unsubscribed { sid: String, kind: TrackKind },
    Unpublished { sid: String, kind: TrackKind },
    Enabled { sid: String, kind: TrackKind },
    Disabled { sid: String, kind: TrackKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected(RemoteParticipantInfo),
    ParticipantDisconnected { participant_id: String },
    /// The transport dropped the room.
    Disconnected { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Room was lost mid-session; chat may continue.
    Lost,
    Failed,
}

/// Track references currently held for one remote participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteParticipantState {
    pub id: String,
    pub audio: Option<RemoteTrack>,
    pub video: Option<RemoteTrack>,
}

impl RemoteParticipantState {
    pub fn from_info(info: &RemoteParticipantInfo) -> Self {
        let mut state = Self {
            id: info.id.clone(),
            ..Self::default()
        };
        for track in &info.tracks {
            *state.slot_mut(track.kind) = Some(track.clone());
        }
        state
    }

    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: TrackKind) -> &mut Option<RemoteTrack> {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    /// Apply one notification. Unsubscribe/unpublish clears the reference
    /// immediately so no stale frame is rendered.
    pub fn apply(&mut self, event: &TrackEvent) {
        match event {
            TrackEvent::Published(track) | TrackEvent::Subscribed(track) => {
                *self.slot_mut(track.kind) = Some(track.clone());
            }
            TrackEvent::Unsubscribed { sid, kind } | TrackEvent::Unpublished { sid, kind } => {
                let slot = self.slot_mut(*kind);
                if slot.as_ref().is_some_and(|t| &t.sid == sid) {
                    *slot = None;
                }
            }
            TrackEvent::Enabled { sid, kind } | TrackEvent::Disabled { sid, kind } => {
                let enabled = matches!(event, TrackEvent::Enabled { .. });
                if let Some(track) = self.slot_mut(*kind).as_mut().filter(|t| &t.sid == sid) {
                    track.enabled = enabled;
                }
            }
        }
    }

    /// Remote video should show the "camera off" placeholder.
    pub fn camera_off(&self) -> bool {
        !self.video.as_ref().is_some_and(|t| t.enabled)
    }
}

/// Observable media session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaState {
    pub connection: ConnectionState,
    pub room_name: Option<String>,
    pub camera_enabled: bool,
    pub microphone_enabled: bool,
    pub participants: BTreeMap<String, RemoteParticipantState>,
}

impl MediaState {
    pub fn set_local_enabled(&mut self, kind: TrackKind, enabled: bool) {
        match kind {
            TrackKind::Audio => self.microphone_enabled = enabled,
            TrackKind::Video => self.camera_enabled = enabled,
        }
    }

    pub fn remote_count(&self) -> usize {
        self.participants.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    #[default]
    Absent,
    Present,
    /// Everyone left; waiting out the grace period before declaring absence.
    Reconnecting,
}

// ==============================================================================
// CHAT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Patient,
    Provider,
}

impl ChatRole {
    pub fn counterpart(&self) -> ChatRole {
        match self {
            ChatRole::Patient => ChatRole::Provider,
            ChatRole::Provider => ChatRole::Patient,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::Patient => write!(f, "patient"),
            ChatRole::Provider => write!(f, "provider"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    System,
    User,
}

pub const PARTICIPANT_JOINED: &str = "participant_joined";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: ChatMessageKind,
    pub content: String,
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            kind: ChatMessageKind::User,
            content: content.into(),
            time,
        }
    }

    pub fn system(content: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            kind: ChatMessageKind::System,
            content: content.into(),
            time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatPayload {
    Message { message: ChatMessage },
    Typing { is_typing: bool },
}

/// Unit carried over the chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub chat_id: String,
    pub from: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ChatRole>,
    #[serde(flatten)]
    pub payload: ChatPayload,
}

impl ChatEnvelope {
    pub fn is_for(&self, role: ChatRole) -> bool {
        self.from != role && self.to.map_or(true, |to| to == role)
    }

    pub fn encode(&self) -> Result<String, VideoConferencingError> {
        serde_json::to_string(self).map_err(|e| VideoConferencingError::Transport {
            message: format!("Failed to encode chat envelope: {}", e),
        })
    }

    pub fn decode(raw: &str) -> Result<Self, VideoConferencingError> {
        serde_json::from_str(raw).map_err(|e| VideoConferencingError::Transport {
            message: format!("Failed to decode chat envelope: {}", e),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    #[default]
    Idle,
    Joined,
    /// Transport closed underneath us; not retried here.
    Disconnected,
    Closed,
}

// ==============================================================================
// SESSION CONTROLLER MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub media_token: String,
    pub room_name: String,
    pub role: ChatRole,
    pub options: ConnectOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    pub consultation_id: Option<ConsultationId>,
    pub chat_open: bool,
    pub unread_count: usize,
    /// Media failed to connect or was lost; session continues chat-only.
    pub media_degraded: bool,
    pub chat_available: bool,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VideoConferencingError {
    #[error("Media session is not connected")]
    NotConnected,

    #[error("A connect for this room is already in progress")]
    ConnectInProgress,

    #[error("Connect was cancelled by disconnect")]
    ConnectCancelled,

    #[error("{operation} is already in progress")]
    OperationInProgress { operation: String },

    #[error("Media transport error: {message}")]
    Transport { message: String },

    #[error("Could not acquire local {kind} track: {message}")]
    TrackUnavailable { kind: TrackKind, message: String },

    #[error("Chat unavailable: {message}")]
    ChatUnavailable { message: String },

    #[error("Chat channel not joined")]
    ChatNotJoined,

    #[error("Already joined chat {chat_id}")]
    AlreadyJoined { chat_id: String },

    #[error("Consultation {consultation_id} cannot be joined now")]
    NotJoinable { consultation_id: ConsultationId },

    #[error("No session is open")]
    SessionNotOpen,

    #[error("Session for consultation {consultation_id} is already open")]
    SessionAlreadyOpen { consultation_id: ConsultationId },
}
