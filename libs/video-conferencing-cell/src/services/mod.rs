// libs/video-conferencing-cell/src/services/mod.rs

pub mod chat;
pub mod controller;
pub mod media;
pub mod presence;
pub mod transport;

pub use chat::{ListenerHandle, SessionChatBridge};
pub use controller::{NavigationHandler, SessionController};
pub use media::MediaSessionManager;
pub use presence::PresenceTracker;
pub use transport::{ChatChannel, ChatTransport, LocalTrack, MediaRoom, MediaTransport, Subscription};
