use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type MessageId = i64;
pub type CourseId = i64;
pub type LessonId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn counterpart(self) -> Role {
        match self {
            Role::Teacher => Role::Student,
            Role::Student => Role::Teacher,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Authenticated user of this client. Fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// The other side of the active conversation, as returned by the assignments endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPartner {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ChatPartner {
    pub fn new(id: UserId, first_name: &str, last_name: &str) -> Self {
        Self {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            profile_picture: None,
            is_verified: None,
            email: None,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// A teacher/student pair. Two messages belong to the same conversation iff both ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversation {
    pub teacher_id: UserId,
    pub student_id: UserId,
}

impl Conversation {
    pub fn for_partner(identity: &Identity, partner: &ChatPartner) -> Self {
        match identity.role {
            Role::Teacher => Self { teacher_id: identity.user_id, student_id: partner.id },
            Role::Student => Self { teacher_id: partner.id, student_id: identity.user_id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub teacher_id: UserId,
    pub student_id: UserId,
    pub sent_by: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation(&self) -> Conversation {
        Conversation { teacher_id: self.teacher_id, student_id: self.student_id }
    }
}

/// Body of `POST /message/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub teacher_id: UserId,
    pub student_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl NewMessage {
    pub fn text(conversation: Conversation, content: &str) -> Self {
        Self {
            teacher_id: conversation.teacher_id,
            student_id: conversation.student_id,
            content: content.to_string(),
            kind: "text".to_string(),
        }
    }
}

/// Body of `POST /assignments/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAssignment {
    pub student_id: UserId,
    pub course_id: CourseId,
    pub message: String,
    pub status: String,
}

impl NewAssignment {
    pub fn pending(student_id: UserId, course_id: CourseId, message: &str) -> Self {
        Self {
            student_id,
            course_id,
            message: message.to_string(),
            status: "pending".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub document_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub lesson_id: LessonId,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_lessons: u32,
    pub completed_lessons: u32,
}
