use course_core::mirror::CourseMirror;
use course_core::model::{ChapterId, CourseId, LessonId, LessonStatus, Percentage};
use serde::Serialize;

/// Read-only navigation view of the mirror.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sidebar {
    pub course_id: CourseId,
    pub chapters: Vec<SidebarChapter>,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    /// Share of completed lessons, 0 to 100.
    pub course_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidebarChapter {
    pub id: ChapterId,
    pub title: String,
    pub lessons: Vec<SidebarLesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidebarLesson {
    pub id: LessonId,
    pub title: String,
    pub status: LessonStatus,
    pub watch_percentage: Percentage,
    pub is_unlocked: bool,
    pub is_completed: bool,
    /// Local progress the server has not confirmed yet.
    pub unsynced: bool,
    pub is_active: bool,
}

impl Sidebar {
    #[must_use]
    pub fn build(mirror: &CourseMirror, active: Option<LessonId>) -> Self {
        let hierarchy = mirror.hierarchy();
        let chapters: Vec<SidebarChapter> = hierarchy
            .chapters()
            .iter()
            .map(|chapter| SidebarChapter {
                id: chapter.id(),
                title: chapter.title().to_string(),
                lessons: chapter
                    .lessons()
                    .iter()
                    .filter_map(|lesson| {
                        let progress = mirror.lesson(lesson.id())?;
                        Some(SidebarLesson {
                            id: lesson.id(),
                            title: lesson.title().to_string(),
                            status: progress.status(lesson.quiz_required()),
                            watch_percentage: progress.watch_percentage,
                            is_unlocked: progress.is_unlocked,
                            is_completed: progress.is_completed,
                            unsynced: mirror.is_unsynced(lesson.id()),
                            is_active: active == Some(lesson.id()),
                        })
                    })
                    .collect(),
            })
            .collect();

        let total_lessons = hierarchy.lesson_count();
        let completed_lessons = mirror.completed_count();
        #[allow(clippy::cast_precision_loss)]
        let course_percentage = if total_lessons == 0 {
            0.0
        } else {
            completed_lessons as f64 * 100.0 / total_lessons as f64
        };

        Self {
            course_id: hierarchy.id(),
            chapters,
            completed_lessons,
            total_lessons,
            course_percentage,
        }
    }

    pub fn lessons(&self) -> impl Iterator<Item = &SidebarLesson> {
        self.chapters.iter().flat_map(|chapter| chapter.lessons.iter())
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&SidebarLesson> {
        self.lessons().find(|lesson| lesson.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::mirror::ProgressEvent;
    use course_core::model::{Chapter, CourseHierarchy, Lesson, QuizId};
    use course_core::reconcile::apply_server_snapshot;
    use std::sync::Arc;

    #[test]
    fn groups_lessons_by_chapter_with_status() {
        let hierarchy = CourseHierarchy::new(
            CourseId::new(1),
            vec![
                Chapter::new(
                    ChapterId::new(1),
                    "Start",
                    1,
                    vec![
                        Lesson::new(LessonId::new(1), "Hello", 1),
                        Lesson::new(LessonId::new(2), "Quiz me", 2).with_quiz(QuizId::new(9), true),
                    ],
                ),
                Chapter::new(
                    ChapterId::new(2),
                    "End",
                    2,
                    vec![Lesson::new(LessonId::new(3), "Bye", 1)],
                ),
            ],
        )
        .unwrap();
        let mirror = apply_server_snapshot(Arc::new(hierarchy), Vec::new());
        let mirror = mirror
            .reduce(ProgressEvent::Progress {
                lesson: LessonId::new(1),
                percentage: 100.0,
                actual_percentage: 80.0,
            })
            .unwrap()
            .mirror;

        let sidebar = Sidebar::build(&mirror, Some(LessonId::new(1)));
        assert_eq!(sidebar.chapters.len(), 2);
        assert_eq!(sidebar.total_lessons, 3);
        assert_eq!(sidebar.completed_lessons, 1);

        let first = sidebar.lesson(LessonId::new(1)).unwrap();
        assert_eq!(first.status, LessonStatus::Completed);
        assert!(first.unsynced);
        assert!(first.is_active);

        let second = sidebar.lesson(LessonId::new(2)).unwrap();
        assert_eq!(second.status, LessonStatus::NotStarted);
        assert!(!second.unsynced);
        assert_eq!(
            sidebar.lesson(LessonId::new(3)).unwrap().status,
            LessonStatus::Locked
        );

        let json = serde_json::to_value(&sidebar).unwrap();
        assert_eq!(json["chapters"][0]["lessons"][0]["watch_percentage"], 100.0);
        assert_eq!(json["chapters"][1]["lessons"][0]["is_unlocked"], false);
    }
}
