//! Chat between the local user and one partner.
//!
//! The timeline is fed by the REST history and by `new_message` pushes from the
//! realtime channel. Exactly one channel listener exists per session while a
//! partner is selected, and it is replaced on every partner change so that no
//! delivery can land in the wrong conversation. Results of requests that
//! complete after the partner changed are dropped.
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::client::models::timeline::Timeline;
use crate::client::services::realtime_channel::{ChannelFrame, ChannelHub, ListenerGuard};
use crate::client::services::rest_gateway::RestGateway;
use crate::common::{
    ChatPartner, ClientError, ClientResult, Conversation, CourseId, Identity, Message, NewAssignment, NewMessage,
    Role,
};

struct ActiveListener {
    guard: ListenerGuard,
    task: JoinHandle<()>,
}

impl ActiveListener {
    fn stop(self) {
        drop(self.guard);
        self.task.abort();
    }
}

#[derive(Default)]
struct ChatInner {
    partner: Option<ChatPartner>,
    timeline: Timeline,
    // bumped on every partner change
    generation: u64,
}

struct Shared {
    inner: Mutex<ChatInner>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

pub struct ChatSession {
    identity: Identity,
    gateway: Arc<dyn RestGateway>,
    hub: Arc<ChannelHub>,
    shared: Arc<Shared>,
    // released synchronously, also on drop
    listener: parking_lot::Mutex<Option<ActiveListener>>,
}

impl ChatSession {
    pub fn new(identity: Identity, gateway: Arc<dyn RestGateway>, hub: Arc<ChannelHub>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            identity,
            gateway,
            hub,
            shared: Arc::new(Shared { inner: Mutex::new(ChatInner::default()), revision }),
            listener: parking_lot::Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Revision counter bumped whenever the timeline or the partner changes.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn partner(&self) -> Option<ChatPartner> {
        self.shared.inner.lock().await.partner.clone()
    }

    pub async fn conversation(&self) -> Option<Conversation> {
        let inner = self.shared.inner.lock().await;
        inner
            .partner
            .as_ref()
            .map(|p| Conversation::for_partner(&self.identity, p))
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.shared.inner.lock().await.timeline.messages().to_vec()
    }

    /// Makes `partner` the active conversation and reloads its history.
    pub async fn select_partner(&self, partner: ChatPartner) -> ClientResult<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            self.stop_listener();
            log::info!("[CHAT] Selected partner {} ({})", partner.id, partner.display_name());
            inner.partner = Some(partner);
            inner.generation += 1;
            inner.timeline.clear();
            self.arm_listener(&inner);
        }
        self.shared.bump();
        self.load_history().await
    }

    /// Deselects the partner, dropping the listener and the timeline.
    pub async fn clear_partner(&self) {
        {
            let mut inner = self.shared.inner.lock().await;
            self.stop_listener();
            inner.partner = None;
            inner.generation += 1;
            inner.timeline.clear();
        }
        self.shared.bump();
    }

    /// Student side: selects the single assigned teacher, if the server reports one.
    pub async fn resolve_assigned_teacher(&self) -> ClientResult<Option<ChatPartner>> {
        let teacher = match self.gateway.assigned_teacher().await {
            Ok(teacher) => teacher,
            Err(e) => {
                log::error!("[CHAT] Failed to load participants: {}", e);
                return Err(e);
            }
        };
        match teacher {
            Some(teacher) => {
                // a failed history load is already logged, the partner stays selected
                let _ = self.select_partner(teacher.clone()).await;
                Ok(Some(teacher))
            }
            None => {
                log::warn!("[CHAT] No teacher assigned to student {}", self.identity.user_id);
                Ok(None)
            }
        }
    }

    /// Teacher side: students the teacher can pick from.
    pub async fn roster(&self) -> ClientResult<Vec<ChatPartner>> {
        self.gateway.assigned_students().await.map_err(|e| {
            log::error!("[CHAT] Failed to load participants: {}", e);
            e
        })
    }

    /// Replaces the timeline with the server's history of the active conversation.
    /// On failure the current timeline is left as it was.
    pub async fn load_history(&self) -> ClientResult<()> {
        let (conversation, generation) = {
            let inner = self.shared.inner.lock().await;
            let partner = inner.partner.as_ref().ok_or(ClientError::NoPartner)?;
            (Conversation::for_partner(&self.identity, partner), inner.generation)
        };

        let history = match self.gateway.list_messages(conversation).await {
            Ok(history) => history,
            Err(e) => {
                log::error!("[CHAT] Failed to load messages: {}", e);
                return Err(e);
            }
        };

        {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation {
                log::debug!("[CHAT] Dropping history of a conversation that is no longer active");
                return Ok(());
            }
            inner.timeline.replace(history);
            log::debug!("[CHAT] Loaded {} messages", inner.timeline.len());
        }
        self.shared.bump();
        Ok(())
    }

    /// Sends `content` to the active partner. Blank content is refused before any
    /// request. The message enters the timeline only once the server confirmed it.
    pub async fn send(&self, content: &str) -> ClientResult<Message> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let (conversation, generation) = {
            let inner = self.shared.inner.lock().await;
            let partner = inner.partner.as_ref().ok_or(ClientError::NoPartner)?;
            (Conversation::for_partner(&self.identity, partner), inner.generation)
        };

        let body = NewMessage::text(conversation, content);
        let message = match self.gateway.create_message(&body).await {
            Ok(message) => message,
            Err(e) => {
                log::error!("[CHAT] Failed to send message: {}", e);
                return Err(e);
            }
        };

        let inserted = {
            let mut inner = self.shared.inner.lock().await;
            inner.generation == generation && inner.timeline.insert(message.clone())
        };
        if inserted {
            self.shared.bump();
        }

        if let Err(e) = self.hub.emit(ChannelFrame::SendMessage(message.clone())) {
            log::warn!("[CHAT] Could not publish message {} on the channel: {}", message.id, e);
        }
        Ok(message)
    }

    /// Teacher side: assigns the active student to `course_id`.
    pub async fn send_assignment(&self, course_id: CourseId, message: &str) -> ClientResult<()> {
        if self.identity.role != Role::Teacher {
            return Err(ClientError::NotTeacher);
        }
        if message.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let student_id = {
            let inner = self.shared.inner.lock().await;
            inner.partner.as_ref().ok_or(ClientError::NoPartner)?.id
        };
        self.gateway
            .create_assignment(&NewAssignment::pending(student_id, course_id, message))
            .await
            .map_err(|e| {
                log::error!("[CHAT] Failed to send assignment: {}", e);
                e
            })
    }

    /// Drops the listener and the partner.
    pub async fn shutdown(&self) {
        self.clear_partner().await;
    }

    fn stop_listener(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
    }

    fn arm_listener(&self, inner: &ChatInner) {
        let Some(partner) = inner.partner.as_ref() else {
            return;
        };
        let conversation = Conversation::for_partner(&self.identity, partner);
        let generation = inner.generation;
        let (guard, mut rx) = self.hub.listen().into_parts();
        let shared = self.shared.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if message.conversation() != conversation {
                    log::debug!("[CHAT] Discarding message {} for another conversation", message.id);
                    continue;
                }
                let inserted = {
                    let mut inner = shared.inner.lock().await;
                    if inner.generation != generation {
                        break;
                    }
                    inner.timeline.insert(message)
                };
                if inserted {
                    shared.bump();
                }
            }
        });
        *self.listener.lock() = Some(ActiveListener { guard, task });
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
