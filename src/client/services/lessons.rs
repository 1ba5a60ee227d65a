use std::collections::HashSet;

use crate::client::services::rest_gateway::RestGateway;
use crate::common::{ClientResult, CourseId, Lesson, LessonId};

#[derive(Debug, Clone, PartialEq)]
pub struct LessonStatus {
    pub lesson: Lesson,
    pub completed: bool,
}

/// Lessons of one course with the user's progress on them.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseOverview {
    pub course_id: CourseId,
    pub lessons: Vec<LessonStatus>,
    pub total: u32,
    pub completed: u32,
}

impl CourseOverview {
    pub async fn load(gateway: &dyn RestGateway, course_id: CourseId) -> ClientResult<Self> {
        let (mut lessons, progress, summary) = tokio::try_join!(
            gateway.lessons_for_course(course_id),
            gateway.course_progress(course_id),
            gateway.course_progress_summary(course_id),
        )
        .map_err(|e| {
            log::error!("[GATEWAY] Failed to load course {}: {}", course_id, e);
            e
        })?;

        let done: HashSet<LessonId> = progress
            .into_iter()
            .filter(|p| p.is_completed)
            .map(|p| p.lesson_id)
            .collect();
        lessons.sort_by_key(|l| l.position);

        Ok(Self {
            course_id,
            lessons: lessons
                .into_iter()
                .map(|lesson| LessonStatus { completed: done.contains(&lesson.id), lesson })
                .collect(),
            total: summary.total_lessons,
            completed: summary.completed_lessons,
        })
    }

    /// Completion in whole percent.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (f64::from(self.completed) / f64::from(self.total) * 100.0).round() as u32
    }

    pub fn next_lesson(&self) -> Option<&Lesson> {
        self.lessons.iter().find(|s| !s.completed).map(|s| &s.lesson)
    }
}

pub async fn complete_lesson(gateway: &dyn RestGateway, lesson_id: LessonId) -> ClientResult<()> {
    gateway.complete_lesson(lesson_id).await.map_err(|e| {
        log::error!("[GATEWAY] Failed to complete lesson {}: {}", lesson_id, e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        ChatPartner, ClientError, Conversation, LessonProgress, Message, NewAssignment, NewMessage, ProgressSummary,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CourseGateway {
        summary_fails: bool,
        completed: Mutex<Vec<LessonId>>,
    }

    fn lesson(id: LessonId, position: i32) -> Lesson {
        Lesson {
            id,
            title: format!("Lesson {}", id),
            content: None,
            position,
            media_url: None,
            media_type: None,
            document_content: None,
        }
    }

    #[async_trait]
    impl RestGateway for CourseGateway {
        async fn list_messages(&self, _conversation: Conversation) -> ClientResult<Vec<Message>> {
            Ok(Vec::new())
        }
        async fn create_message(&self, _body: &NewMessage) -> ClientResult<Message> {
            Err(ClientError::Unauthorized)
        }
        async fn assigned_teacher(&self) -> ClientResult<Option<ChatPartner>> {
            Ok(None)
        }
        async fn assigned_students(&self) -> ClientResult<Vec<ChatPartner>> {
            Ok(Vec::new())
        }
        async fn create_assignment(&self, _body: &NewAssignment) -> ClientResult<()> {
            Ok(())
        }
        async fn lessons_for_course(&self, _course_id: CourseId) -> ClientResult<Vec<Lesson>> {
            Ok(vec![lesson(10, 3), lesson(11, 1), lesson(12, 2)])
        }
        async fn course_progress(&self, _course_id: CourseId) -> ClientResult<Vec<LessonProgress>> {
            Ok(vec![
                LessonProgress { lesson_id: 11, is_completed: true },
                LessonProgress { lesson_id: 12, is_completed: false },
            ])
        }
        async fn course_progress_summary(&self, _course_id: CourseId) -> ClientResult<ProgressSummary> {
            if self.summary_fails {
                return Err(ClientError::Status { status: 500, path: "/progress".to_string() });
            }
            Ok(ProgressSummary { total_lessons: 3, completed_lessons: 1 })
        }
        async fn complete_lesson(&self, lesson_id: LessonId) -> ClientResult<()> {
            self.completed.lock().unwrap().push(lesson_id);
            Ok(())
        }
    }

    fn gateway(summary_fails: bool) -> CourseGateway {
        CourseGateway { summary_fails, completed: Mutex::new(Vec::new()) }
    }

    #[tokio::test]
    async fn overview_orders_lessons_and_marks_progress() {
        let overview = CourseOverview::load(&gateway(false), 4).await.unwrap();
        let ids: Vec<_> = overview.lessons.iter().map(|s| (s.lesson.id, s.completed)).collect();
        assert_eq!(ids, vec![(11, true), (12, false), (10, false)]);
        assert_eq!(overview.percent(), 33);
        assert_eq!(overview.next_lesson().map(|l| l.id), Some(12));
    }

    #[tokio::test]
    async fn any_failed_request_fails_the_overview() {
        assert!(CourseOverview::load(&gateway(true), 4).await.is_err());
    }

    #[tokio::test]
    async fn complete_lesson_reaches_the_gateway() {
        let gw = gateway(false);
        complete_lesson(&gw, 12).await.unwrap();
        assert_eq!(*gw.completed.lock().unwrap(), vec![12]);
    }

    #[test]
    fn empty_course_is_zero_percent() {
        let overview = CourseOverview { course_id: 1, lessons: Vec::new(), total: 0, completed: 0 };
        assert_eq!(overview.percent(), 0);
        let half = CourseOverview { course_id: 1, lessons: Vec::new(), total: 3, completed: 2 };
        assert_eq!(half.percent(), 67);
    }
}
