//! Shared fakes for the coordinator tests: an in-process REST gateway, presence
//! store wrappers that count or fail writes, and a recording ringer.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{oneshot, Notify};

use lesson_chat::client::services::presence_store::{CallOffer, MemoryPresenceStore, PresenceStore, PresenceWatch};
use lesson_chat::client::services::rest_gateway::RestGateway;
use lesson_chat::client::services::ringer::Ringer;
use lesson_chat::common::{
    ChatPartner, ClientError, ClientResult, Conversation, CourseId, Lesson, LessonId, LessonProgress, Message,
    MessageId, NewAssignment, NewMessage, ProgressSummary, Role, RoomId,
};

/// Polls `check` until it holds or two seconds have passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn message(id: MessageId, conversation: Conversation, sent_by: Role, minute: u32) -> Message {
    Message {
        id,
        teacher_id: conversation.teacher_id,
        student_id: conversation.student_id,
        sent_by,
        content: format!("message {}", id),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, minute, 0).unwrap(),
    }
}

#[derive(Default)]
pub struct MockGateway {
    pub history: Mutex<Vec<Message>>,
    pub created: Mutex<Vec<NewMessage>>,
    pub assignments: Mutex<Vec<NewAssignment>>,
    pub teacher: Mutex<Option<ChatPartner>>,
    pub students: Mutex<Vec<ChatPartner>>,
    pub fail_create: AtomicBool,
    pub fail_history: AtomicBool,
    pub history_calls: AtomicUsize,
    /// When set, the next history request parks until the sender fires.
    pub hold_history: Mutex<Option<oneshot::Receiver<()>>>,
    pub history_parked: Notify,
    next_id: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_id: AtomicUsize::new(1000), ..Default::default() })
    }

    pub fn with_history(history: Vec<Message>) -> Arc<Self> {
        let gateway = Self::new();
        *gateway.history.lock().unwrap() = history;
        gateway
    }

    pub fn hold_next_history(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.hold_history.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl RestGateway for MockGateway {
    async fn list_messages(&self, conversation: Conversation) -> ClientResult<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold_history.lock().unwrap().take();
        if let Some(hold) = hold {
            self.history_parked.notify_one();
            let _ = hold.await;
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ClientError::Status { status: 500, path: "/message".to_string() });
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation() == conversation)
            .cloned()
            .collect())
    }

    async fn create_message(&self, body: &NewMessage) -> ClientResult<Message> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ClientError::Status { status: 503, path: "/message/create".to_string() });
        }
        self.created.lock().unwrap().push(body.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as MessageId;
        Ok(Message {
            id,
            teacher_id: body.teacher_id,
            student_id: body.student_id,
            sent_by: Role::Student,
            content: body.content.clone(),
            created_at: Utc::now(),
        })
    }

    async fn assigned_teacher(&self) -> ClientResult<Option<ChatPartner>> {
        Ok(self.teacher.lock().unwrap().clone())
    }

    async fn assigned_students(&self) -> ClientResult<Vec<ChatPartner>> {
        Ok(self.students.lock().unwrap().clone())
    }

    async fn create_assignment(&self, body: &NewAssignment) -> ClientResult<()> {
        self.assignments.lock().unwrap().push(body.clone());
        Ok(())
    }

    async fn lessons_for_course(&self, _course_id: CourseId) -> ClientResult<Vec<Lesson>> {
        Ok(Vec::new())
    }

    async fn course_progress(&self, _course_id: CourseId) -> ClientResult<Vec<LessonProgress>> {
        Ok(Vec::new())
    }

    async fn course_progress_summary(&self, _course_id: CourseId) -> ClientResult<ProgressSummary> {
        Ok(ProgressSummary { total_lessons: 0, completed_lessons: 0 })
    }

    async fn complete_lesson(&self, _lesson_id: LessonId) -> ClientResult<()> {
        Ok(())
    }
}

/// Memory store that counts writes and can be told to reject deletions.
pub struct CountingStore {
    pub inner: MemoryPresenceStore,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_delete: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: MemoryPresenceStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_delete: AtomicBool::new(false),
        })
    }

    pub fn failing_delete(inner: MemoryPresenceStore) -> Arc<Self> {
        let store = Self::new(inner);
        store.fail_delete.store(true, Ordering::SeqCst);
        store
    }

    pub fn writes(&self) -> usize {
        self.puts.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceStore for CountingStore {
    async fn watch(&self, room: &RoomId) -> ClientResult<PresenceWatch> {
        self.inner.watch(room).await
    }

    async fn put_offer(&self, room: &RoomId, offer: &CallOffer) -> ClientResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_offer(room, offer).await
    }

    async fn delete(&self, room: &RoomId) -> ClientResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ClientError::Presence("deletion rejected".to_string()));
        }
        self.inner.delete(room).await
    }
}

#[derive(Default)]
pub struct RecordingRinger {
    ringing: AtomicBool,
    starts: AtomicUsize,
}

impl RecordingRinger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Ringer for RecordingRinger {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.ringing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.ringing.store(false, Ordering::SeqCst);
    }
}
