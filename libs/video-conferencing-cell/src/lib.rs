// libs/video-conferencing-cell/src/lib.rs
//! # Video Conferencing Cell
//!
//! The live part of a consultation: the media room, the chat channel and
//! the controller that drives the consultation screen.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                   Video Cell                        |
//! +-----------------------------------------------------+
//! |  models.rs       |  Tracks, room events, chat       |
//! |                  |  envelopes, session state        |
//! |  services/       |                                  |
//! |    transport.rs  |  Media + chat transport seams    |
//! |    media.rs      |  MediaSessionManager             |
//! |    presence.rs   |  Other-party presence w/ grace   |
//! |    chat.rs       |  SessionChatBridge               |
//! |    controller.rs |  SessionController               |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Session lifecycle
//!
//! `SessionController::open` checks the consultation's join window, then
//! connects media and joins chat concurrently. Media failure degrades to a
//! chat-only session. `leave` disconnects media first, leaves chat, and only
//! then calls the [`NavigationHandler`].
//!
//! Transports are traits so the cell never depends on a particular SFU or
//! realtime vendor.

pub mod models;
pub mod services;

pub use models::{
    ChatEnvelope, ChatMessage, ChatMessageKind, ChatPayload, ChatRole, ChatStatus,
    ConnectOptions, ConnectionState, ControllerState, MediaState, PresenceState,
    RemoteParticipantInfo, RemoteParticipantState, RemoteTrack, RoomEvent, SessionCredentials,
    TrackEvent, TrackKind, VideoConferencingError,
};

pub use services::{
    ChatChannel, ChatTransport, ListenerHandle, LocalTrack, MediaRoom, MediaSessionManager,
    MediaTransport, NavigationHandler, PresenceTracker, SessionChatBridge, SessionController,
    Subscription,
};
