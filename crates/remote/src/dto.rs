//! Wire shapes exchanged with the learning backend.
//!
//! Each API version gets its own module. Request and response bodies reject
//! fields they do not know so that a server-side change fails loudly instead
//! of being half-read.

pub mod v1 {
    use course_core::mirror::ProgressAck;
    use course_core::model::{
        Chapter, ChapterId, CourseHierarchy, CourseId, Lesson, LessonId, LessonProgress,
        PendingWrite, Percentage, QuizId,
    };
    use course_core::reconcile::ServerSnapshot;
    use serde::{Deserialize, Serialize};

    use crate::gateway::{QuizSubmission, RemoteError, SavedQuizProgress, SubmissionResult};

    fn decode<E: core::fmt::Display>(e: E) -> RemoteError {
        RemoteError::Decode(e.to_string())
    }

    //
    // ─── COURSE ────────────────────────────────────────────────────────────────
    //

    /// `GET /courses/{id}/learning`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct LearningResponse {
        pub course_id: u64,
        pub chapters: Vec<ChapterDto>,
        #[serde(default)]
        pub progress: Vec<LessonProgressDto>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ChapterDto {
        pub id: u64,
        pub title: String,
        pub order: u32,
        pub lessons: Vec<LessonDto>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct LessonDto {
        pub id: u64,
        pub title: String,
        pub order: u32,
        #[serde(default)]
        pub quiz_id: Option<u64>,
        #[serde(default)]
        pub quiz_required: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct LessonProgressDto {
        pub lesson_id: u64,
        pub watch_percentage: f64,
        #[serde(default)]
        pub current_position: f64,
        #[serde(default)]
        pub total_watch_time: f64,
        pub is_completed: bool,
        pub is_unlocked: bool,
        #[serde(default)]
        pub quiz_passed: Option<bool>,
    }

    impl TryFrom<LearningResponse> for ServerSnapshot {
        type Error = RemoteError;

        fn try_from(body: LearningResponse) -> Result<Self, Self::Error> {
            let chapters = body
                .chapters
                .into_iter()
                .map(|chapter| {
                    let lessons = chapter
                        .lessons
                        .into_iter()
                        .map(|lesson| {
                            let built =
                                Lesson::new(LessonId::new(lesson.id), lesson.title, lesson.order);
                            match lesson.quiz_id {
                                Some(quiz) => built.with_quiz(QuizId::new(quiz), lesson.quiz_required),
                                None if lesson.quiz_required => built.requiring_quiz(),
                                None => built,
                            }
                        })
                        .collect();
                    Chapter::new(
                        ChapterId::new(chapter.id),
                        chapter.title,
                        chapter.order,
                        lessons,
                    )
                })
                .collect();

            let hierarchy =
                CourseHierarchy::new(CourseId::new(body.course_id), chapters).map_err(decode)?;
            let progress = body
                .progress
                .into_iter()
                .map(|dto| Ok((LessonId::new(dto.lesson_id), dto.into_progress()?)))
                .collect::<Result<Vec<_>, RemoteError>>()?;

            Ok(ServerSnapshot {
                hierarchy,
                progress,
            })
        }
    }

    impl LessonProgressDto {
        fn into_progress(self) -> Result<LessonProgress, RemoteError> {
            Ok(LessonProgress {
                watch_percentage: Percentage::new(self.watch_percentage).map_err(decode)?,
                current_position: self.current_position,
                total_watch_time: self.total_watch_time,
                is_completed: self.is_completed,
                is_unlocked: self.is_unlocked,
                quiz_passed: self.quiz_passed,
            })
        }
    }

    //
    // ─── LESSON PROGRESS ───────────────────────────────────────────────────────
    //

    /// `PUT /progress/lessons/{id}`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ProgressWriteRequest {
        pub lesson_id: u64,
        pub watch_percentage: f64,
        pub current_position: f64,
        pub total_watch_time: f64,
    }

    impl From<&PendingWrite> for ProgressWriteRequest {
        fn from(write: &PendingWrite) -> Self {
            Self {
                lesson_id: write.lesson_id.value(),
                watch_percentage: write.watch_percentage.value(),
                current_position: write.current_position,
                total_watch_time: write.total_watch_time,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ProgressAckResponse {
        pub lesson_id: u64,
        pub watch_percentage: f64,
        pub is_completed: bool,
        #[serde(default)]
        pub is_unlocked_next: Option<u64>,
    }

    impl TryFrom<ProgressAckResponse> for ProgressAck {
        type Error = RemoteError;

        fn try_from(body: ProgressAckResponse) -> Result<Self, Self::Error> {
            Ok(ProgressAck {
                lesson_id: LessonId::new(body.lesson_id),
                watch_percentage: Percentage::new(body.watch_percentage).map_err(decode)?,
                is_completed: body.is_completed,
                next_unlocked: body.is_unlocked_next.map(LessonId::new),
            })
        }
    }

    //
    // ─── QUIZ ──────────────────────────────────────────────────────────────────
    //

    /// `GET|PUT /quizzes/{id}/progress`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct QuizProgressBody {
        pub answers: Vec<i32>,
        pub current_question_index: usize,
    }

    impl From<&SavedQuizProgress> for QuizProgressBody {
        fn from(progress: &SavedQuizProgress) -> Self {
            Self {
                answers: progress.answers.clone(),
                current_question_index: progress.current_question_index,
            }
        }
    }

    impl From<QuizProgressBody> for SavedQuizProgress {
        fn from(body: QuizProgressBody) -> Self {
            Self {
                answers: body.answers,
                current_question_index: body.current_question_index,
            }
        }
    }

    /// `POST /quizzes/{id}/submit`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct QuizSubmitRequest {
        pub answers: Vec<i32>,
        pub time_taken: u64,
    }

    impl From<&QuizSubmission> for QuizSubmitRequest {
        fn from(submission: &QuizSubmission) -> Self {
            Self {
                answers: submission.answers.clone(),
                time_taken: submission.time_taken,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct QuizSubmitResponse {
        pub passed: bool,
        pub score: f64,
    }

    impl From<QuizSubmitResponse> for SubmissionResult {
        fn from(body: QuizSubmitResponse) -> Self {
            Self {
                passed: body.passed,
                score: body.score,
            }
        }
    }

    /// Error payload. Read leniently: only the message is of interest.
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ErrorBody {
        #[serde(default, alias = "detail")]
        pub message: Option<String>,
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use course_core::model::LessonStatus;

        const LEARNING: &str = r#"{
            "course_id": 3,
            "chapters": [
                {"id": 2, "title": "Two", "order": 2, "lessons": [
                    {"id": 20, "title": "Later", "order": 1}
                ]},
                {"id": 1, "title": "One", "order": 1, "lessons": [
                    {"id": 11, "title": "Second", "order": 2, "quiz_id": 5, "quiz_required": true},
                    {"id": 10, "title": "First", "order": 1}
                ]}
            ],
            "progress": [
                {"lesson_id": 10, "watch_percentage": 100, "is_completed": true, "is_unlocked": true}
            ]
        }"#;

        #[test]
        fn learning_response_maps_to_ordered_snapshot() {
            let body: LearningResponse = serde_json::from_str(LEARNING).unwrap();
            let snapshot = ServerSnapshot::try_from(body).unwrap();
            let order: Vec<u64> = snapshot
                .hierarchy
                .reading_order()
                .iter()
                .map(|id| id.value())
                .collect();
            assert_eq!(order, vec![10, 11, 20]);
            assert!(
                snapshot
                    .hierarchy
                    .lesson(LessonId::new(11))
                    .unwrap()
                    .quiz_required()
            );

            let mirror = snapshot.into_mirror();
            assert_eq!(mirror.status(LessonId::new(10)), Some(LessonStatus::Completed));
            assert_eq!(mirror.status(LessonId::new(11)), Some(LessonStatus::NotStarted));
        }

        #[test]
        fn unknown_fields_are_rejected() {
            let body = r#"{"lesson_id": 1, "watch_percentage": 10, "is_completed": false, "xp": 4}"#;
            assert!(serde_json::from_str::<ProgressAckResponse>(body).is_err());
        }

        #[test]
        fn out_of_range_percentage_is_a_decode_error() {
            let body = ProgressAckResponse {
                lesson_id: 1,
                watch_percentage: 140.0,
                is_completed: false,
                is_unlocked_next: None,
            };
            assert!(matches!(
                ProgressAck::try_from(body),
                Err(RemoteError::Decode(_))
            ));
        }

        #[test]
        fn ack_carries_optional_unlock() {
            let body: ProgressAckResponse = serde_json::from_str(
                r#"{"lesson_id": 4, "watch_percentage": 96.5, "is_completed": true, "is_unlocked_next": 5}"#,
            )
            .unwrap();
            let ack = ProgressAck::try_from(body).unwrap();
            assert_eq!(ack.next_unlocked, Some(LessonId::new(5)));
            assert_eq!(ack.watch_percentage.value(), 96.5);
        }

        #[test]
        fn invalid_hierarchy_is_a_decode_error() {
            let body = LearningResponse {
                course_id: 1,
                chapters: Vec::new(),
                progress: Vec::new(),
            };
            assert!(matches!(
                ServerSnapshot::try_from(body),
                Err(RemoteError::Decode(_))
            ));
        }
    }
}
