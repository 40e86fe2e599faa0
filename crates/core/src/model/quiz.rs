use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, QuestionId, QuizId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz has no questions")]
    Empty,

    #[error("pass percentage must be in [0, 100], got {0}")]
    InvalidPassPercentage(f64),

    #[error("question {question} needs at least two options")]
    TooFewOptions { question: usize },

    #[error("question {question} marks a correct answer that is not one of its options")]
    CorrectAnswerOutOfRange { question: usize },

    #[error("question index {index} is out of range for a quiz with {count} questions")]
    QuestionOutOfRange { index: usize, count: usize },

    #[error("answer {answer} is out of range for question {question} ({options} options)")]
    AnswerOutOfRange {
        question: usize,
        answer: usize,
        options: usize,
    },

    #[error("please answer every question before submitting (unanswered: {})", join_numbers(.missing))]
    Incomplete { missing: Vec<usize> },

    #[error("quiz is {0:?}, expected an attempt in progress")]
    NotInProgress(QuizPhase),

    #[error("saved progress belongs to quiz {found}, not quiz {expected}")]
    WrongQuiz { expected: QuizId, found: QuizId },
}

fn join_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

//
// ─── DEFINITION ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    TrueFalse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
}

/// Question set handed over by the quiz UI.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizDefinition {
    id: QuizId,
    lesson_id: LessonId,
    questions: Vec<Question>,
    pass_percentage: f64,
    time_limit: Option<Duration>,
}

impl QuizDefinition {
    /// # Errors
    ///
    /// Returns `QuizError` if there are no questions, a question has fewer than
    /// two options or an out-of-range answer key, or `pass_percentage` is not
    /// within `[0, 100]`.
    pub fn new(
        id: QuizId,
        lesson_id: LessonId,
        questions: Vec<Question>,
        pass_percentage: f64,
        time_limit: Option<Duration>,
    ) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::Empty);
        }
        if !pass_percentage.is_finite() || !(0.0..=100.0).contains(&pass_percentage) {
            return Err(QuizError::InvalidPassPercentage(pass_percentage));
        }
        for (idx, question) in questions.iter().enumerate() {
            if question.options.len() < 2 {
                return Err(QuizError::TooFewOptions { question: idx + 1 });
            }
            if question.correct_answer_index >= question.options.len() {
                return Err(QuizError::CorrectAnswerOutOfRange { question: idx + 1 });
            }
        }

        Ok(Self {
            id,
            lesson_id,
            questions,
            pass_percentage,
            time_limit: time_limit.filter(|limit| *limit > Duration::zero()),
        })
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn pass_percentage(&self) -> f64 {
        self.pass_percentage
    }

    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    fn check_answer(&self, question: usize, answer: usize) -> Result<(), QuizError> {
        let q = self
            .questions
            .get(question)
            .ok_or(QuizError::QuestionOutOfRange {
                index: question,
                count: self.questions.len(),
            })?;
        if answer >= q.options.len() {
            return Err(QuizError::AnswerOutOfRange {
                question: question + 1,
                answer,
                options: q.options.len(),
            });
        }
        Ok(())
    }
}

//
// ─── ATTEMPT STATE ─────────────────────────────────────────────────────────────
//

/// Marker the wire format uses for an unanswered question.
pub const UNANSWERED: i32 = -1;

/// Answers and cursor of one attempt; what gets saved for resumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAttemptState {
    pub quiz_id: QuizId,
    answers: BTreeMap<usize, usize>,
    current_question_index: usize,
}

impl QuizAttemptState {
    #[must_use]
    pub fn new(quiz_id: QuizId) -> Self {
        Self {
            quiz_id,
            answers: BTreeMap::new(),
            current_question_index: 0,
        }
    }

    /// Rebuild state from the saved wire shape (`-1` means unanswered).
    ///
    /// A cursor past the end is pulled back to the last question.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` when an index or answer does not fit `definition`.
    pub fn from_wire(
        definition: &QuizDefinition,
        answers: &[i32],
        current_question_index: usize,
    ) -> Result<Self, QuizError> {
        let count = definition.question_count();
        if answers.len() > count {
            return Err(QuizError::QuestionOutOfRange {
                index: answers.len() - 1,
                count,
            });
        }

        let mut state = Self::new(definition.id());
        for (question, raw) in answers.iter().enumerate() {
            let Ok(answer) = usize::try_from(*raw) else {
                continue;
            };
            definition.check_answer(question, answer)?;
            state.answers.insert(question, answer);
        }
        state.current_question_index = current_question_index.min(count - 1);
        Ok(state)
    }

    /// Full answer list in question order, `-1` where unanswered.
    #[must_use]
    pub fn to_wire(&self, question_count: usize) -> Vec<i32> {
        (0..question_count)
            .map(|q| {
                self.answers
                    .get(&q)
                    .and_then(|a| i32::try_from(*a).ok())
                    .unwrap_or(UNANSWERED)
            })
            .collect()
    }

    #[must_use]
    pub fn answer(&self, question: usize) -> Option<usize> {
        self.answers.get(&question).copied()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    /// 1-based numbers of the questions still unanswered.
    #[must_use]
    pub fn missing_questions(&self, question_count: usize) -> Vec<usize> {
        (0..question_count)
            .filter(|q| !self.answers.contains_key(q))
            .map(|q| q + 1)
            .collect()
    }
}

//
// ─── GRADE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq)]
pub struct QuizGrade {
    pub correct: usize,
    pub total: usize,
    /// Percentage of correct answers.
    pub score: f64,
    pub passed: bool,
}

/// Grade `state` against the answer key. Unanswered questions count as wrong.
#[must_use]
pub fn grade(definition: &QuizDefinition, state: &QuizAttemptState) -> QuizGrade {
    let total = definition.question_count();
    let correct = definition
        .questions()
        .iter()
        .enumerate()
        .filter(|(idx, q)| state.answer(*idx) == Some(q.correct_answer_index))
        .count();

    #[allow(clippy::cast_precision_loss)]
    let score = if total == 0 {
        0.0
    } else {
        correct as f64 * 100.0 / total as f64
    };

    QuizGrade {
        correct,
        total,
        score,
        passed: score >= definition.pass_percentage(),
    }
}

//
// ─── ATTEMPT STATE MACHINE ─────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
    NotStarted,
    InProgress,
    Submitted,
}

/// One learner's pass through a quiz: `NotStarted -> InProgress -> Submitted`.
///
/// A submitted attempt can be started again, which begins from a blank state.
#[derive(Debug, Clone)]
pub struct QuizAttempt {
    definition: Arc<QuizDefinition>,
    phase: QuizPhase,
    state: QuizAttemptState,
    started_at: Option<DateTime<Utc>>,
}

impl QuizAttempt {
    #[must_use]
    pub fn new(definition: Arc<QuizDefinition>) -> Self {
        let state = QuizAttemptState::new(definition.id());
        Self {
            definition,
            phase: QuizPhase::NotStarted,
            state,
            started_at: None,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &QuizDefinition {
        &self.definition
    }

    #[must_use]
    pub fn phase(&self) -> QuizPhase {
        self.phase
    }

    #[must_use]
    pub fn state(&self) -> &QuizAttemptState {
        &self.state
    }

    /// Begin a blank attempt. Starting an attempt already in progress is a no-op.
    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.phase == QuizPhase::InProgress {
            return;
        }
        self.state = QuizAttemptState::new(self.definition.id());
        self.phase = QuizPhase::InProgress;
        self.started_at = Some(now);
    }

    /// Continue from saved state without asking the learner.
    ///
    /// The clock restarts at `now`: saved progress records answers and position
    /// but not elapsed time, so a time limit applies in full to the resumed
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::WrongQuiz` if `saved` belongs to a different quiz.
    pub fn resume(&mut self, saved: QuizAttemptState, now: DateTime<Utc>) -> Result<(), QuizError> {
        if saved.quiz_id != self.definition.id() {
            return Err(QuizError::WrongQuiz {
                expected: self.definition.id(),
                found: saved.quiz_id,
            });
        }
        self.state = saved;
        self.phase = QuizPhase::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    fn ensure_in_progress(&self) -> Result<(), QuizError> {
        if self.phase == QuizPhase::InProgress {
            Ok(())
        } else {
            Err(QuizError::NotInProgress(self.phase))
        }
    }

    /// # Errors
    ///
    /// Returns `QuizError` if the attempt is not in progress or the indices are invalid.
    pub fn select_answer(&mut self, question: usize, answer: usize) -> Result<(), QuizError> {
        self.ensure_in_progress()?;
        self.definition.check_answer(question, answer)?;
        self.state.answers.insert(question, answer);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `QuizError` if the attempt is not in progress or `question` is out of range.
    pub fn go_to(&mut self, question: usize) -> Result<(), QuizError> {
        self.ensure_in_progress()?;
        let count = self.definition.question_count();
        if question >= count {
            return Err(QuizError::QuestionOutOfRange {
                index: question,
                count,
            });
        }
        self.state.current_question_index = question;
        Ok(())
    }

    /// Every question must be answered before a normal submission.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Incomplete` naming the unanswered question numbers.
    pub fn validate_complete(&self) -> Result<(), QuizError> {
        self.ensure_in_progress()?;
        let missing = self
            .state
            .missing_questions(self.definition.question_count());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QuizError::Incomplete { missing })
        }
    }

    #[must_use]
    pub fn grade(&self) -> QuizGrade {
        grade(&self.definition, &self.state)
    }

    /// Move to `Submitted` and drop the answers so they cannot be resumed.
    pub fn finish(&mut self) {
        self.phase = QuizPhase::Submitted;
        self.state = QuizAttemptState::new(self.definition.id());
    }

    #[must_use]
    pub fn time_taken(&self, now: DateTime<Utc>) -> Duration {
        self.started_at
            .map(|started| now.signed_duration_since(started).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let limit = self.definition.time_limit()?;
        Some((limit - self.time_taken(now)).max(Duration::zero()))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.phase == QuizPhase::InProgress
            && self.time_remaining(now) == Some(Duration::zero())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
