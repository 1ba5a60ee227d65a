use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::client::config::ClientConfig;
use crate::common::{
    ChatPartner, ClientError, ClientResult, Conversation, CourseId, Lesson, LessonId, LessonProgress,
    Message, NewAssignment, NewMessage, ProgressSummary,
};

/// Typed operations of the school's REST API that this client consumes.
#[async_trait]
pub trait RestGateway: Send + Sync {
    /// `GET /message?teacherId=&studentId=`, in whatever order the server returns.
    async fn list_messages(&self, conversation: Conversation) -> ClientResult<Vec<Message>>;

    /// `POST /message/create`, returns the stored message with its authoritative id and timestamp.
    async fn create_message(&self, body: &NewMessage) -> ClientResult<Message>;

    /// `GET /assignments/teacher`, the student's assigned teacher if any.
    async fn assigned_teacher(&self) -> ClientResult<Option<ChatPartner>>;

    /// `GET /assignments/student`, the teacher's roster.
    async fn assigned_students(&self) -> ClientResult<Vec<ChatPartner>>;

    async fn create_assignment(&self, body: &NewAssignment) -> ClientResult<()>;

    async fn lessons_for_course(&self, course_id: CourseId) -> ClientResult<Vec<Lesson>>;

    async fn course_progress(&self, course_id: CourseId) -> ClientResult<Vec<LessonProgress>>;

    async fn course_progress_summary(&self, course_id: CourseId) -> ClientResult<ProgressSummary>;

    async fn complete_lesson(&self, lesson_id: LessonId) -> ClientResult<()>;
}

#[derive(Debug, Deserialize)]
struct AssignedTeacherResponse {
    #[serde(default)]
    teacher: Vec<ChatPartner>,
}

/// `RestGateway` over HTTP. Every request carries the bearer token, if one is known.
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig, token: Option<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("lesson-chat/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        if token.is_none() {
            log::warn!("[GATEWAY] No authentication token found, requests will be anonymous");
        }
        Ok(Self {
            base_url: config.api_base_url.clone(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, path: &str, req: RequestBuilder) -> ClientResult<reqwest::Response> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            log::error!("[GATEWAY] Unauthorized access on {}, login required", path);
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Status { status: status.as_u16(), path: path.to_string() });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        log::debug!("[GATEWAY] GET {}", path);
        let resp = self.send(path, self.client.get(self.url(path))).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<reqwest::Response> {
        log::debug!("[GATEWAY] POST {}", path);
        self.send(path, self.client.post(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl RestGateway for HttpGateway {
    async fn list_messages(&self, conversation: Conversation) -> ClientResult<Vec<Message>> {
        let path = format!(
            "/message?teacherId={}&studentId={}",
            conversation.teacher_id, conversation.student_id
        );
        self.get_json(&path).await
    }

    async fn create_message(&self, body: &NewMessage) -> ClientResult<Message> {
        let resp = self.post_json("/message/create", body).await?;
        Ok(resp.json::<Message>().await?)
    }

    async fn assigned_teacher(&self) -> ClientResult<Option<ChatPartner>> {
        let resp: AssignedTeacherResponse = self.get_json("/assignments/teacher").await?;
        Ok(resp.teacher.into_iter().next())
    }

    async fn assigned_students(&self) -> ClientResult<Vec<ChatPartner>> {
        self.get_json("/assignments/student").await
    }

    async fn create_assignment(&self, body: &NewAssignment) -> ClientResult<()> {
        self.post_json("/assignments/create", body).await?;
        Ok(())
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> ClientResult<Vec<Lesson>> {
        self.get_json(&format!("/lessons/course/{}", course_id)).await
    }

    async fn course_progress(&self, course_id: CourseId) -> ClientResult<Vec<LessonProgress>> {
        self.get_json(&format!("/progress/course/{}", course_id)).await
    }

    async fn course_progress_summary(&self, course_id: CourseId) -> ClientResult<ProgressSummary> {
        self.get_json(&format!("/progress/course/{}/summary", course_id)).await
    }

    async fn complete_lesson(&self, lesson_id: LessonId) -> ClientResult<()> {
        let path = format!("/progress/complete/{}", lesson_id);
        log::debug!("[GATEWAY] POST {}", path);
        self.send(&path, self.client.post(self.url(&path))).await?;
        Ok(())
    }
}
