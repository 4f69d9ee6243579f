// libs/video-conferencing-cell/src/services/chat.rs
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_utils::{Clock, SystemClock};

use crate::models::{
    ChatEnvelope, ChatMessage, ChatPayload, ChatRole, ChatStatus, VideoConferencingError,
    PARTICIPANT_JOINED,
};
use crate::services::transport::{ChatChannel, ChatTransport, Subscription};

pub type MessageHandler = Arc<dyn Fn(&ChatMessage) + Send + Sync>;
pub type TypingHandler = Arc<dyn Fn(ChatRole, bool) + Send + Sync>;

/// Chat channel bound to one consultation. Delivers messages and typing
/// notifications to registered handlers and keeps the received history.
pub struct SessionChatBridge {
    shared: Arc<ChatShared>,
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    join_announce_delay: Duration,
    session: Mutex<Option<ChatSession>>,
}

struct ChatShared {
    status: watch::Sender<ChatStatus>,
    listeners: Mutex<Listeners>,
    history: Mutex<Vec<ChatMessage>>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    messages: Vec<(u64, MessageHandler)>,
    typing: Vec<(u64, TypingHandler)>,
}

struct ChatSession {
    chat_id: String,
    role: ChatRole,
    channel: Arc<dyn ChatChannel>,
    cancel: CancellationToken,
    _pump: Subscription,
    _announce: Subscription,
}

/// Registration returned by `on_receive` / `on_typing_changed`.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    shared: Weak<ChatShared>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut listeners = shared.listeners();
            listeners.messages.retain(|(id, _)| *id != self.id);
            listeners.typing.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionChatBridge {
    pub fn new(transport: Arc<dyn ChatTransport>, config: &AppConfig) -> Self {
        let (status, _) = watch::channel(ChatStatus::Idle);
        Self {
            shared: Arc::new(ChatShared {
                status,
                listeners: Mutex::new(Listeners::default()),
                history: Mutex::new(Vec::new()),
            }),
            transport,
            clock: Arc::new(SystemClock),
            join_announce_delay: Duration::from_millis(config.chat_join_announce_delay_ms),
            session: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn status(&self) -> ChatStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChatStatus> {
        self.shared.status.subscribe()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.shared.history().clone()
    }

    pub fn is_joined(&self) -> bool {
        self.session().is_some()
    }

    /// Open the channel for `chat_id` and start delivering to handlers.
    /// A "participant joined" system message follows after the configured
    /// delay unless the bridge is left first.
    pub async fn join(&self, chat_id: &str, role: ChatRole) -> Result<(), VideoConferencingError> {
        if let Some(session) = self.session().as_ref() {
            if session.chat_id == chat_id {
                debug!("Chat {} already joined", chat_id);
                return Ok(());
            }
            return Err(VideoConferencingError::AlreadyJoined {
                chat_id: session.chat_id.clone(),
            });
        }

        info!("Joining chat {} as {}", chat_id, role);
        let channel = match self.transport.open(chat_id, role).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Failed to open chat {}: {}", chat_id, e);
                self.shared.status.send_replace(ChatStatus::Disconnected);
                return Err(match e {
                    e @ VideoConferencingError::ChatUnavailable { .. } => e,
                    other => VideoConferencingError::ChatUnavailable {
                        message: other.to_string(),
                    },
                });
            }
        };

        let conflict = {
            let mut session = self.session();
            match session.as_ref().map(|existing| existing.chat_id.clone()) {
                Some(existing_id) => Some(existing_id),
                None => {
                    let cancel = CancellationToken::new();
                    let pump = self.spawn_pump(&channel, chat_id, role, cancel.clone());
                    let announce =
                        self.spawn_join_announcement(&channel, chat_id, role, cancel.clone());
                    *session = Some(ChatSession {
                        chat_id: chat_id.to_string(),
                        role,
                        channel: channel.clone(),
                        cancel,
                        _pump: pump,
                        _announce: announce,
                    });
                    None
                }
            }
        };

        if let Some(existing_id) = conflict {
            channel.close().await;
            if existing_id == chat_id {
                return Ok(());
            }
            return Err(VideoConferencingError::AlreadyJoined { chat_id: existing_id });
        }

        self.shared.status.send_replace(ChatStatus::Joined);
        Ok(())
    }

    /// Publish a user message. `to` narrows delivery to one role.
    pub async fn send(
        &self,
        content: &str,
        to: Option<ChatRole>,
    ) -> Result<ChatMessage, VideoConferencingError> {
        let (channel, chat_id, role) = self.joined()?;
        let message = ChatMessage::user(content, self.clock.now());

        channel
            .publish(ChatEnvelope {
                chat_id,
                from: role,
                to,
                payload: ChatPayload::Message {
                    message: message.clone(),
                },
            })
            .await?;

        self.shared.history().push(message.clone());
        Ok(message)
    }

    pub async fn set_typing(
        &self,
        is_typing: bool,
        to: Option<ChatRole>,
    ) -> Result<(), VideoConferencingError> {
        let (channel, chat_id, role) = self.joined()?;
        channel
            .publish(ChatEnvelope {
                chat_id,
                from: role,
                to,
                payload: ChatPayload::Typing { is_typing },
            })
            .await
    }

    pub fn on_receive<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let mut listeners = self.shared.listeners();
        let id = listeners.next_id();
        listeners.messages.push((id, Arc::new(handler)));
        self.handle(id)
    }

    pub fn on_typing_changed<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(ChatRole, bool) + Send + Sync + 'static,
    {
        let mut listeners = self.shared.listeners();
        let id = listeners.next_id();
        listeners.typing.push((id, Arc::new(handler)));
        self.handle(id)
    }

    /// Cancel the pending announcement, drop every handler and close the channel.
    pub async fn leave(&self) {
        let Some(session) = self.session().take() else {
            *self.shared.listeners() = Listeners::default();
            return;
        };

        session.cancel.cancel();
        *self.shared.listeners() = Listeners::default();
        session.channel.close().await;
        self.shared.status.send_replace(ChatStatus::Closed);
        info!("Left chat {}", session.chat_id);
    }

    fn joined(&self) -> Result<(Arc<dyn ChatChannel>, String, ChatRole), VideoConferencingError> {
        self.session()
            .as_ref()
            .map(|s| (s.channel.clone(), s.chat_id.clone(), s.role))
            .ok_or(VideoConferencingError::ChatNotJoined)
    }

    fn handle(&self, id: u64) -> ListenerHandle {
        ListenerHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<ChatSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_pump(
        &self,
        channel: &Arc<dyn ChatChannel>,
        chat_id: &str,
        role: ChatRole,
        cancel: CancellationToken,
    ) -> Subscription {
        let mut incoming = channel.subscribe();
        let shared = Arc::downgrade(&self.shared);
        let chat_id = chat_id.to_string();

        Subscription::spawn_with(cancel, move |cancel| async move {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = incoming.recv() => received,
                };
                let Some(shared) = shared.upgrade() else { break };
                match received {
                    Ok(envelope) => {
                        if envelope.chat_id == chat_id && envelope.is_for(role) {
                            shared.dispatch(envelope);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Chat {} lagged, skipped {} envelopes", chat_id, skipped);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Chat {} closed by transport", chat_id);
                        shared.status.send_replace(ChatStatus::Disconnected);
                        break;
                    }
                }
            }
        })
    }

    fn spawn_join_announcement(
        &self,
        channel: &Arc<dyn ChatChannel>,
        chat_id: &str,
        role: ChatRole,
        cancel: CancellationToken,
    ) -> Subscription {
        let channel = channel.clone();
        let clock = self.clock.clone();
        let chat_id = chat_id.to_string();
        let deadline = tokio::time::Instant::now() + self.join_announce_delay;

        Subscription::spawn_with(cancel, move |cancel| async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let envelope = ChatEnvelope {
                chat_id: chat_id.clone(),
                from: role,
                to: None,
                payload: ChatPayload::Message {
                    message: ChatMessage::system(PARTICIPANT_JOINED, clock.now()),
                },
            };
            if let Err(e) = channel.publish(envelope).await {
                warn!("Failed to announce join in chat {}: {}", chat_id, e);
            }
        })
    }
}

impl ChatShared {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, envelope: ChatEnvelope) {
        match envelope.payload {
            ChatPayload::Message { message } => {
                self.history().push(message.clone());
                let handlers: Vec<_> = self
                    .listeners()
                    .messages
                    .iter()
                    .map(|(_, h)| h.clone())
                    .collect();
                for handler in handlers {
                    handler(&message);
                }
            }
            ChatPayload::Typing { is_typing } => {
                let handlers: Vec<_> = self
                    .listeners()
                    .typing
                    .iter()
                    .map(|(_, h)| h.clone())
                    .collect();
                for handler in handlers {
                    handler(envelope.from, is_typing);
                }
            }
        }
    }
}

impl Listeners {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
