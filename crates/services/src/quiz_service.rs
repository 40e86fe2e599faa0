use std::sync::Arc;

use chrono::Duration;
use course_core::Clock;
use course_core::model::{
    LessonId, QuizAttempt, QuizAttemptState, QuizDefinition, QuizGrade, QuizId, QuizPhase,
};
use course_core::scheduler::WritePolicy;
use remote::{QuizGateway, QuizSubmission, SavedQuizProgress};

use crate::autosave::{WriteDriver, WriteStats};
use crate::config::SyncConfig;
use crate::error::QuizServiceError;

/// Independent save streams of one attempt. Each has at most one request in
/// flight; both carry the full answer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveChannel {
    Answers,
    Navigation,
}

/// How `QuizSession::start` entered the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Fresh,
    Resumed {
        answered: usize,
        current_question_index: usize,
    },
    /// The attempt was already running; nothing changed.
    AlreadyInProgress,
}

/// Result of a submitted attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizOutcome {
    pub quiz_id: QuizId,
    pub lesson_id: LessonId,
    pub passed: bool,
    pub score: f64,
    /// Local grading of the submitted answers.
    pub grade: QuizGrade,
    pub time_taken: Duration,
    /// Graded locally without contacting the server.
    pub preview: bool,
}

enum Mode {
    Normal(Arc<dyn QuizGateway>),
    Preview,
}

/// Drives one quiz attempt: silent resume, debounced saves, submission.
pub struct QuizSession {
    attempt: QuizAttempt,
    mode: Mode,
    answer_debounce: Duration,
    navigation_debounce: Duration,
    saves: WriteDriver<SaveChannel, SavedQuizProgress, ()>,
    clock: Clock,
}

impl QuizSession {
    #[must_use]
    pub fn new(
        definition: Arc<QuizDefinition>,
        gateway: Arc<dyn QuizGateway>,
        config: &SyncConfig,
        clock: Clock,
    ) -> Self {
        Self::with_mode(definition, Mode::Normal(gateway), config, clock)
    }

    /// An attempt that is graded locally and never touches the network.
    #[must_use]
    pub fn preview(definition: Arc<QuizDefinition>, config: &SyncConfig, clock: Clock) -> Self {
        Self::with_mode(definition, Mode::Preview, config, clock)
    }

    fn with_mode(
        definition: Arc<QuizDefinition>,
        mode: Mode,
        config: &SyncConfig,
        clock: Clock,
    ) -> Self {
        Self {
            attempt: QuizAttempt::new(definition),
            mode,
            answer_debounce: config.answer_debounce,
            navigation_debounce: config.navigation_debounce,
            saves: WriteDriver::new(),
            clock,
        }
    }

    #[must_use]
    pub fn attempt(&self) -> &QuizAttempt {
        &self.attempt
    }

    #[must_use]
    pub fn is_preview(&self) -> bool {
        matches!(self.mode, Mode::Preview)
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.attempt.time_remaining(self.clock.now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.attempt.is_expired(self.clock.now())
    }

    #[must_use]
    pub fn save_stats(&self) -> WriteStats {
        self.saves.stats()
    }

    #[must_use]
    pub fn is_saving(&self, channel: SaveChannel) -> bool {
        self.saves.is_in_flight(&channel)
    }

    #[must_use]
    pub fn pending_save(&self, channel: SaveChannel) -> Option<&SavedQuizProgress> {
        self.saves.pending_payload(&channel)
    }

    //
    // ─── START ─────────────────────────────────────────────────────────────────
    //

    /// Enter the attempt, continuing a saved one without asking.
    ///
    /// A saved record that cannot be read or does not fit the quiz is logged
    /// and replaced by a fresh attempt.
    pub async fn start(&mut self) -> StartOutcome {
        if self.attempt.phase() == QuizPhase::InProgress {
            return StartOutcome::AlreadyInProgress;
        }
        let now = self.clock.now();
        let quiz = self.attempt.definition().id();

        let Mode::Normal(gateway) = &self.mode else {
            self.attempt.start(now);
            return StartOutcome::Fresh;
        };

        let saved = match gateway.load_quiz_progress(quiz).await {
            Ok(saved) => saved,
            Err(e) => {
                log::warn!("could not look up saved progress for quiz {quiz}: {e}");
                None
            }
        };

        let restored = saved.and_then(|saved| {
            QuizAttemptState::from_wire(
                self.attempt.definition(),
                &saved.answers,
                saved.current_question_index,
            )
            .map_err(|e| log::warn!("discarding saved progress for quiz {quiz}: {e}"))
            .ok()
        });

        match restored {
            Some(state) => {
                let answered = state.answered_count();
                let current_question_index = state.current_question_index();
                match self.attempt.resume(state, now) {
                    Ok(()) => {
                        log::debug!("resumed quiz {quiz} at question {current_question_index}");
                        StartOutcome::Resumed {
                            answered,
                            current_question_index,
                        }
                    }
                    Err(e) => {
                        log::warn!("discarding saved progress for quiz {quiz}: {e}");
                        self.attempt.start(now);
                        StartOutcome::Fresh
                    }
                }
            }
            None => {
                self.attempt.start(now);
                StartOutcome::Fresh
            }
        }
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` for invalid indices or an attempt not in progress.
    pub fn select_answer(&mut self, question: usize, answer: usize) -> Result<(), QuizServiceError> {
        self.attempt.select_answer(question, answer)?;
        self.schedule_save(SaveChannel::Answers);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` for an out-of-range question or an attempt not in progress.
    pub fn go_to(&mut self, question: usize) -> Result<(), QuizServiceError> {
        self.attempt.go_to(question)?;
        self.schedule_save(SaveChannel::Navigation);
        Ok(())
    }

    /// Move forward one question; stays put on the last one.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` if the attempt is not in progress.
    pub fn next_question(&mut self) -> Result<(), QuizServiceError> {
        let last = self.attempt.definition().question_count().saturating_sub(1);
        let target = (self.attempt.state().current_question_index() + 1).min(last);
        self.go_to(target)
    }

    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` if the attempt is not in progress.
    pub fn previous_question(&mut self) -> Result<(), QuizServiceError> {
        let target = self
            .attempt
            .state()
            .current_question_index()
            .saturating_sub(1);
        self.go_to(target)
    }

    fn schedule_save(&mut self, channel: SaveChannel) {
        if self.is_preview() {
            return;
        }
        let debounce = match channel {
            SaveChannel::Answers => self.answer_debounce,
            SaveChannel::Navigation => self.navigation_debounce,
        };
        let count = self.attempt.definition().question_count();
        let state = self.attempt.state();
        let payload = SavedQuizProgress {
            answers: state.to_wire(count),
            current_question_index: state.current_question_index(),
        };
        self.saves.schedule(
            channel,
            payload,
            WritePolicy::debounce(debounce),
            self.clock.now(),
        );
        self.pump();
    }

    /// Release finished saves and send the ones whose quiet period elapsed.
    pub fn pump(&mut self) -> usize {
        self.saves.collect_finished();
        let Mode::Normal(gateway) = &self.mode else {
            return 0;
        };
        let gateway = Arc::clone(gateway);
        let quiz = self.attempt.definition().id();
        self.saves.dispatch_due(self.clock.now(), move |_, progress| {
            let gateway = Arc::clone(&gateway);
            async move { gateway.save_quiz_progress(quiz, &progress).await }
        })
    }

    /// Wait for in-flight saves.
    pub async fn settle(&mut self) {
        self.saves.settle().await;
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    /// Submit a fully answered attempt.
    ///
    /// Unanswered questions are reported before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz(QuizError::Incomplete)` naming the missing
    /// questions, or `QuizServiceError::Remote` if the submission fails; a
    /// failed submission leaves the attempt in progress.
    pub async fn submit(&mut self) -> Result<QuizOutcome, QuizServiceError> {
        self.attempt.validate_complete()?;
        self.submit_answers().await
    }

    /// Submit whatever was answered once the time limit ran out. Unanswered
    /// questions count as wrong.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::NotExpired` while time remains (or the quiz
    /// has no limit), or `QuizServiceError::Remote` if the submission fails.
    pub async fn submit_expired(&mut self) -> Result<QuizOutcome, QuizServiceError> {
        if !self.is_expired() {
            return Err(QuizServiceError::NotExpired);
        }
        self.submit_answers().await
    }

    async fn submit_answers(&mut self) -> Result<QuizOutcome, QuizServiceError> {
        let now = self.clock.now();
        let grade = self.attempt.grade();
        let time_taken = self.attempt.time_taken(now);
        let definition = self.attempt.definition();
        let quiz_id = definition.id();
        let lesson_id = definition.lesson_id();
        let question_count = definition.question_count();

        let Mode::Normal(gateway) = &self.mode else {
            self.attempt.finish();
            log::info!(
                "preview of quiz {quiz_id}: {}/{} correct",
                grade.correct,
                grade.total
            );
            return Ok(QuizOutcome {
                quiz_id,
                lesson_id,
                passed: grade.passed,
                score: grade.score,
                grade,
                time_taken,
                preview: true,
            });
        };
        let gateway = Arc::clone(gateway);

        let submission = QuizSubmission {
            answers: self.attempt.state().to_wire(question_count),
            time_taken: u64::try_from(time_taken.num_seconds()).unwrap_or(0),
        };

        // A save landing after the clear would resurrect the attempt, so hold
        // the pending ones back until the server has graded it.
        let held: Vec<(SaveChannel, SavedQuizProgress)> =
            [SaveChannel::Answers, SaveChannel::Navigation]
                .into_iter()
                .filter_map(|channel| self.saves.cancel(&channel).map(|payload| (channel, payload)))
                .collect();
        self.saves.settle().await;

        let result = match gateway.submit_quiz(quiz_id, &submission).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("submitting quiz {quiz_id} failed, keeping its saved progress: {e}");
                let now = self.clock.now();
                for (channel, payload) in held {
                    self.saves.schedule(channel, payload, WritePolicy::immediate(), now);
                }
                self.pump();
                return Err(e.into());
            }
        };
        self.attempt.finish();
        log::info!(
            "submitted quiz {quiz_id}: score {:.0}, {}",
            result.score,
            if result.passed { "passed" } else { "failed" }
        );

        if let Err(e) = gateway.clear_quiz_progress(quiz_id).await {
            log::warn!("could not clear saved progress for quiz {quiz_id}: {e}");
        }

        Ok(QuizOutcome {
            quiz_id,
            lesson_id,
            passed: result.passed,
            score: result.score,
            grade,
            time_taken,
            preview: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::{Question, QuestionId, QuestionKind, QuizError};
    use course_core::time::fixed_clock;
    use remote::{InMemoryGateway, RemoteCall};

    fn definition(time_limit: Option<Duration>) -> Arc<QuizDefinition> {
        let questions = (1..=3)
            .map(|n| Question {
                id: QuestionId::new(n),
                kind: QuestionKind::SingleChoice,
                options: vec!["a".into(), "b".into(), "c".into()],
                correct_answer_index: 1,
            })
            .collect();
        Arc::new(
            QuizDefinition::new(QuizId::new(4), LessonId::new(8), questions, 60.0, time_limit)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn preview_never_touches_the_network() {
        let mut session = QuizSession::preview(definition(None), &SyncConfig::default(), fixed_clock());
        assert_eq!(session.start().await, StartOutcome::Fresh);
        for q in 0..3 {
            session.select_answer(q, 1).unwrap();
        }
        session.clock_mut().advance(Duration::seconds(5));
        assert_eq!(session.pump(), 0);

        let outcome = session.submit().await.unwrap();
        assert!(outcome.preview);
        assert!(outcome.passed);
        assert_eq!(outcome.grade.correct, 3);
        assert_eq!(session.save_stats().scheduled, 0);
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let gateway = InMemoryGateway::new();
        let mut session = QuizSession::new(
            definition(None),
            Arc::new(gateway.clone()),
            &SyncConfig::default(),
            fixed_clock(),
        );
        assert_eq!(session.start().await, StartOutcome::Fresh);
        session.select_answer(0, 2).unwrap();
        assert_eq!(session.start().await, StartOutcome::AlreadyInProgress);
        assert_eq!(session.attempt().state().answer(0), Some(2));
        assert_eq!(
            gateway
                .calls()
                .iter()
                .filter(|c| matches!(c, RemoteCall::LoadQuizProgress(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn expired_attempt_submits_partial_answers() {
        let gateway = InMemoryGateway::new();
        let definition = definition(Some(Duration::seconds(60)));
        gateway.insert_quiz(definition.as_ref().clone());
        let mut session = QuizSession::new(
            definition,
            Arc::new(gateway.clone()),
            &SyncConfig::default(),
            fixed_clock(),
        );
        session.start().await;
        session.select_answer(0, 1).unwrap();

        assert!(matches!(
            session.submit_expired().await,
            Err(QuizServiceError::NotExpired)
        ));
        assert!(matches!(
            session.submit().await,
            Err(QuizServiceError::Quiz(QuizError::Incomplete { .. }))
        ));

        session.clock_mut().advance(Duration::seconds(61));
        assert!(session.is_expired());
        let outcome = session.submit_expired().await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.grade.correct, 1);
        assert_eq!(outcome.time_taken, Duration::seconds(61));
        assert!(gateway.calls().iter().any(|c| matches!(
            c,
            RemoteCall::SubmitQuiz(_, QuizSubmission { answers, time_taken: 61 }) if answers == &vec![1, -1, -1]
        )));
    }

    #[tokio::test]
    async fn next_and_previous_stay_in_range() {
        let mut session = QuizSession::preview(definition(None), &SyncConfig::default(), fixed_clock());
        session.start().await;
        session.previous_question().unwrap();
        assert_eq!(session.attempt().state().current_question_index(), 0);
        for _ in 0..5 {
            session.next_question().unwrap();
        }
        assert_eq!(session.attempt().state().current_question_index(), 2);
    }
}
