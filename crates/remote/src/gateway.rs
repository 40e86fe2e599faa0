use std::sync::Arc;

use async_trait::async_trait;
use course_core::mirror::ProgressAck;
use course_core::model::{CourseId, LessonId, PendingWrite, QuizId};
use course_core::reconcile::ServerSnapshot;
use thiserror::Error;

/// Errors surfaced by gateway adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("not found")]
    NotFound,

    /// The server refused access to a lesson that is still locked.
    #[error("{message}")]
    Locked { message: String },

    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Saved answers of an unfinished quiz attempt, `-1` where unanswered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedQuizProgress {
    pub answers: Vec<i32>,
    pub current_question_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSubmission {
    pub answers: Vec<i32>,
    /// Whole seconds since the attempt started.
    pub time_taken: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub passed: bool,
    pub score: f64,
}

#[async_trait]
pub trait CourseGateway: Send + Sync {
    /// Fetch the course structure together with the learner's progress.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::NotFound` for unknown courses, or transport errors.
    async fn fetch_learning(&self, course: CourseId) -> Result<ServerSnapshot, RemoteError>;
}

#[async_trait]
pub trait ProgressGateway: Send + Sync {
    /// Ask the server to open a lesson for watching.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Locked` with the server's message when access is denied.
    async fn start_lesson(&self, lesson: LessonId) -> Result<(), RemoteError>;

    /// Write coalesced lesson progress.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the write does not reach the server.
    async fn save_lesson_progress(&self, write: &PendingWrite) -> Result<ProgressAck, RemoteError>;
}

#[async_trait]
pub trait QuizGateway: Send + Sync {
    /// Saved attempt for `quiz`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on transport or decode failures; a missing record is `Ok(None)`.
    async fn load_quiz_progress(&self, quiz: QuizId)
    -> Result<Option<SavedQuizProgress>, RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the save does not reach the server.
    async fn save_quiz_progress(
        &self,
        quiz: QuizId,
        progress: &SavedQuizProgress,
    ) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the record cannot be removed.
    async fn clear_quiz_progress(&self, quiz: QuizId) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the submission fails.
    async fn submit_quiz(
        &self,
        quiz: QuizId,
        submission: &QuizSubmission,
    ) -> Result<SubmissionResult, RemoteError>;
}

/// Aggregates the gateways behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Remote {
    pub courses: Arc<dyn CourseGateway>,
    pub progress: Arc<dyn ProgressGateway>,
    pub quizzes: Arc<dyn QuizGateway>,
}

impl Remote {
    /// Use one backend for every concern.
    #[must_use]
    pub fn from_gateway<G>(gateway: G) -> Self
    where
        G: CourseGateway + ProgressGateway + QuizGateway + Clone + 'static,
    {
        let courses: Arc<dyn CourseGateway> = Arc::new(gateway.clone());
        let progress: Arc<dyn ProgressGateway> = Arc::new(gateway.clone());
        let quizzes: Arc<dyn QuizGateway> = Arc::new(gateway);
        Self {
            courses,
            progress,
            quizzes,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_gateway(crate::memory::InMemoryGateway::new())
    }
}
