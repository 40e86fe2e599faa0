use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::LessonId;

/// Watch percentage at which a lesson counts as watched.
///
/// The same value gates the quiz and unlocks the next lesson.
pub const COMPLETION_THRESHOLD: f64 = 95.0;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("watch percentage must be a finite number in [0, 100], got {0}")]
    InvalidPercentage(f64),

    #[error("lesson {0} is not part of this course")]
    UnknownLesson(LessonId),
}

//
// ─── PERCENTAGE ────────────────────────────────────────────────────────────────
//

/// A watch percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Percentage(f64);

impl Percentage {
    pub const ZERO: Self = Self(0.0);
    pub const FULL: Self = Self(100.0);

    /// Strict constructor for values crossing a trust boundary.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPercentage` if `value` is not finite or
    /// falls outside `[0, 100]`.
    pub fn new(value: f64) -> Result<Self, ProgressError> {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ProgressError::InvalidPercentage(value))
        }
    }

    /// Lenient constructor for raw player ticks: clamps into range.
    ///
    /// Returns `None` for NaN or infinities, which players occasionally emit
    /// before metadata has loaded.
    #[must_use]
    pub fn clamped(value: f64) -> Option<Self> {
        value.is_finite().then(|| Self(value.clamp(0.0, 100.0)))
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 { other } else { self }
    }

    #[must_use]
    pub fn reaches_threshold(self) -> bool {
        self.0 >= COMPLETION_THRESHOLD
    }
}

impl TryFrom<f64> for Percentage {
    type Error = ProgressError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percentage> for f64 {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0)
    }
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Per-lesson progress annotation carried by the hierarchy mirror.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LessonProgress {
    pub watch_percentage: Percentage,
    /// Playhead position in seconds.
    pub current_position: f64,
    /// Seconds of continuous playback accumulated for this lesson.
    pub total_watch_time: f64,
    pub is_completed: bool,
    pub is_unlocked: bool,
    pub quiz_passed: Option<bool>,
}

impl LessonProgress {
    #[must_use]
    pub fn locked() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn unlocked() -> Self {
        Self {
            is_unlocked: true,
            ..Self::default()
        }
    }

    /// Status shown to navigation, given whether the lesson is quiz-gated.
    #[must_use]
    pub fn status(&self, quiz_required: bool) -> LessonStatus {
        if self.is_completed {
            LessonStatus::Completed
        } else if !self.is_unlocked {
            LessonStatus::Locked
        } else if quiz_required
            && self.watch_percentage.reaches_threshold()
            && self.quiz_passed != Some(true)
        {
            LessonStatus::QuizPending
        } else if self.watch_percentage > Percentage::ZERO {
            LessonStatus::InProgress
        } else {
            LessonStatus::NotStarted
        }
    }
}

/// Lesson state as the sidebar renders it.
///
/// `QuizPending` is distinct from both `InProgress` and `Completed`: the video
/// is watched, the next lesson is reachable, but the lesson is not done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Locked,
    NotStarted,
    InProgress,
    QuizPending,
    Completed,
}

//
// ─── PENDING WRITE ─────────────────────────────────────────────────────────────
//

/// Coalesced autosave payload for one lesson.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub lesson_id: LessonId,
    pub watch_percentage: Percentage,
    pub current_position: f64,
    pub total_watch_time: f64,
}

impl PendingWrite {
    #[must_use]
    pub fn from_progress(lesson_id: LessonId, progress: &LessonProgress) -> Self {
        Self {
            lesson_id,
            watch_percentage: progress.watch_percentage,
            current_position: progress.current_position,
            total_watch_time: progress.total_watch_time,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
