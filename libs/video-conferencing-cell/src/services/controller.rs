// libs/video-conferencing-cell/src/services/controller.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

use appointment_cell::{ConsultationId, ConsultationLifecycleService, ConsultationSummary};
use shared_config::AppConfig;
use shared_utils::{Clock, SystemClock};

use crate::models::{
    ChatMessage, ChatMessageKind, ChatRole, ConnectionState, ControllerState, PresenceState,
    SessionCredentials, VideoConferencingError,
};
use crate::services::chat::{ListenerHandle, SessionChatBridge};
use crate::services::media::MediaSessionManager;
use crate::services::transport::Subscription;

/// Invoked once the session has been torn down and the user should leave
/// the consultation screen.
pub trait NavigationHandler: Send + Sync {
    fn leave_session(&self, consultation_id: ConsultationId);
}

/// Live consultation screen: composes media and chat for one consultation
/// and owns the UI-facing flags (chat panel, unread count, degraded media).
pub struct SessionController {
    media: Arc<MediaSessionManager>,
    chat: Arc<SessionChatBridge>,
    navigation: Arc<dyn NavigationHandler>,
    lifecycle: ConsultationLifecycleService,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<ControllerState>>,
    session: Mutex<Option<OpenSession>>,
    generation: AtomicU64,
}

struct OpenSession {
    generation: u64,
    consultation_id: ConsultationId,
    role: ChatRole,
    unread_listener: Option<ListenerHandle>,
    media_watch: Option<Subscription>,
}

impl SessionController {
    pub fn new(
        media: Arc<MediaSessionManager>,
        chat: Arc<SessionChatBridge>,
        navigation: Arc<dyn NavigationHandler>,
        config: &AppConfig,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::default());
        Self {
            media,
            chat,
            navigation,
            lifecycle: ConsultationLifecycleService::new(config),
            clock: Arc::new(SystemClock),
            state: Arc::new(state),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub fn media(&self) -> &MediaSessionManager {
        &self.media
    }

    pub fn chat(&self) -> &SessionChatBridge {
        &self.chat
    }

    pub fn is_open(&self) -> bool {
        self.session().is_some()
    }

    /// The other party counts as present during the reconnect grace period.
    pub fn other_party_present(&self) -> bool {
        self.media.presence() != PresenceState::Absent
    }

    /// Start the session: media and chat connect concurrently. A media
    /// failure leaves a chat-only session; only failure of both is an error.
    pub async fn open(
        &self,
        consultation: &ConsultationSummary,
        credentials: SessionCredentials,
    ) -> Result<(), VideoConferencingError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut session = self.session();
            if let Some(open) = session.as_ref() {
                return Err(VideoConferencingError::SessionAlreadyOpen {
                    consultation_id: open.consultation_id,
                });
            }
            if !self.lifecycle.can_join(consultation, self.clock.now()) {
                return Err(VideoConferencingError::NotJoinable {
                    consultation_id: consultation.id,
                });
            }
            *session = Some(OpenSession {
                generation,
                consultation_id: consultation.id,
                role: credentials.role,
                unread_listener: None,
                media_watch: None,
            });
        }

        info!("Opening session for consultation {}", consultation.id);

        let state = self.state.clone();
        let unread_listener = self.chat.on_receive(move |message: &ChatMessage| {
            if message.kind != ChatMessageKind::User {
                return;
            }
            state.send_if_modified(|state| {
                if state.chat_open {
                    return false;
                }
                state.unread_count += 1;
                true
            });
        });

        let (media, chat) = tokio::join!(
            self.media.connect(
                &credentials.media_token,
                &credentials.room_name,
                credentials.options,
            ),
            self.chat.join(&consultation.chat_id, credentials.role),
        );

        let media_degraded = match &media {
            Ok(_) => false,
            Err(e) => {
                warn!(
                    "Media unavailable for consultation {}, continuing chat-only: {}",
                    consultation.id, e
                );
                true
            }
        };
        let chat_available = match &chat {
            Ok(()) => true,
            Err(e) => {
                warn!("Chat unavailable for consultation {}: {}", consultation.id, e);
                false
            }
        };

        if let (Err(e), Err(_)) = (&media, &chat) {
            unread_listener.unsubscribe();
            self.media.disconnect().await;
            self.chat.leave().await;
            self.session().take();
            return Err(e.clone());
        }

        let mut unread_listener = Some(unread_listener);
        let media_watch = (!media_degraded).then(|| self.watch_media());
        let still_open = {
            let mut session = self.session();
            match session.as_mut() {
                Some(open) if open.generation == generation => {
                    open.unread_listener = unread_listener.take();
                    open.media_watch = media_watch;
                    self.state.send_replace(ControllerState {
                        consultation_id: Some(consultation.id),
                        chat_open: false,
                        unread_count: 0,
                        media_degraded,
                        chat_available,
                    });
                    true
                }
                _ => false,
            }
        };

        if !still_open {
            // Closed while connecting: whatever finished connecting after the
            // close is still live and must be released here.
            if let Some(listener) = unread_listener {
                listener.unsubscribe();
            }
            let superseded = self.session().is_some();
            if superseded {
                warn!(
                    "Session for consultation {} replaced while opening",
                    consultation.id
                );
            } else {
                info!(
                    "Session for consultation {} closed while opening, releasing media and chat",
                    consultation.id
                );
                self.media.disconnect().await;
                self.chat.leave().await;
            }
            return Err(VideoConferencingError::SessionNotOpen);
        }

        info!(
            "Session open for consultation {} (media degraded: {}, chat available: {})",
            consultation.id, media_degraded, chat_available
        );
        Ok(())
    }

    pub async fn toggle_camera(&self) -> Result<bool, VideoConferencingError> {
        self.ensure_open()?;
        self.media.toggle_camera().await
    }

    pub async fn toggle_microphone(&self) -> Result<bool, VideoConferencingError> {
        self.ensure_open()?;
        self.media.toggle_microphone().await
    }

    pub fn open_chat(&self) {
        self.state.send_modify(|state| {
            state.chat_open = true;
            state.unread_count = 0;
        });
    }

    pub fn close_chat(&self) {
        self.state.send_modify(|state| state.chat_open = false);
    }

    /// Returns whether the chat panel is now open.
    pub fn toggle_chat(&self) -> bool {
        if self.state.borrow().chat_open {
            self.close_chat();
            false
        } else {
            self.open_chat();
            true
        }
    }

    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, VideoConferencingError> {
        let role = self.ensure_open()?;
        self.chat.send(content, Some(role.counterpart())).await
    }

    pub async fn set_typing(&self, is_typing: bool) -> Result<(), VideoConferencingError> {
        let role = self.ensure_open()?;
        self.chat.set_typing(is_typing, Some(role.counterpart())).await
    }

    /// Tear the session down without navigating. Media is released before chat.
    pub async fn close(&self) -> Option<ConsultationId> {
        let open = self.session().take()?;

        if let Some(watch) = open.media_watch {
            watch.unsubscribe();
        }
        self.media.disconnect().await;

        if let Some(listener) = open.unread_listener {
            listener.unsubscribe();
        }
        self.chat.leave().await;

        self.state.send_replace(ControllerState::default());
        info!("Closed session for consultation {}", open.consultation_id);
        Some(open.consultation_id)
    }

    /// Close the session, then hand control to the navigation handler.
    pub async fn leave(&self) -> Result<(), VideoConferencingError> {
        let consultation_id = self
            .close()
            .await
            .ok_or(VideoConferencingError::SessionNotOpen)?;
        self.navigation.leave_session(consultation_id);
        Ok(())
    }

    fn ensure_open(&self) -> Result<ChatRole, VideoConferencingError> {
        self.session()
            .as_ref()
            .map(|open| open.role)
            .ok_or(VideoConferencingError::SessionNotOpen)
    }

    fn session(&self) -> MutexGuard<'_, Option<OpenSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flag media as degraded if the room is lost mid-session.
    fn watch_media(&self) -> Subscription {
        let mut media = self.media.subscribe();
        let state = self.state.clone();
        Subscription::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = media.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let lost = media.borrow_and_update().connection == ConnectionState::Lost;
                if lost {
                    warn!("Media room lost, session continues chat-only");
                    state.send_if_modified(|state| {
                        let changed = !state.media_degraded;
                        state.media_degraded = true;
                        changed
                    });
                }
            }
        })
    }
}
