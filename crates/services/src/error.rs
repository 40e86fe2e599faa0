//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{CourseId, LessonId, ProgressError, QuizError};
use remote::RemoteError;

/// Errors emitted while loading a course into a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("could not load course {course}: {source}")]
    Remote {
        course: CourseId,
        #[source]
        source: RemoteError,
    },
}

/// Errors emitted by `LearningSession::start_lesson`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NavigationError {
    /// The lesson is locked, locally or according to the server.
    #[error("{message}")]
    Denied { lesson: LessonId, message: String },
    #[error("lesson {0} is not part of this course")]
    UnknownLesson(LessonId),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors emitted by playback and quiz-result handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no lesson is being watched")]
    NoActiveLesson,
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Errors emitted by `QuizSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizServiceError {
    #[error("the time limit has not run out yet")]
    NotExpired,
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
