mod course;
mod ids;
mod progress;
pub mod quiz;

pub use ids::{ChapterId, CourseId, LessonId, ParseIdError, QuestionId, QuizId};

pub use course::{Chapter, CourseHierarchy, HierarchyError, Lesson, UnlockEdge};
pub use progress::{
    COMPLETION_THRESHOLD, LessonProgress, LessonStatus, PendingWrite, Percentage, ProgressError,
};
pub use quiz::{
    Question, QuestionKind, QuizAttempt, QuizAttemptState, QuizDefinition, QuizError, QuizGrade,
    QuizPhase,
};
