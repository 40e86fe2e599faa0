use std::sync::Arc;

use course_core::Clock;
use course_core::mirror::{CourseMirror, Effect, ProgressAck, ProgressEvent};
use course_core::model::{CourseId, LessonId, QuizDefinition};
use course_core::reconcile::ServerSnapshot;
use remote::{Remote, RemoteError};

use crate::autosave::{AutosaveService, WriteStats};
use crate::config::SyncConfig;
use crate::error::{LoadError, NavigationError, SessionError};
use crate::quiz_service::{QuizOutcome, QuizSession};
use crate::sidebar::Sidebar;

const LOCKED_MESSAGE: &str = "finish the previous lesson to unlock this one";

/// One learner working through one course.
///
/// Owns the progress mirror and the autosave channel. Every handler applies a
/// single event through the mirror's reducer and queues whatever writes the
/// transition asked for; network work happens in background tasks whose
/// acknowledgements are folded in by `pump` or `settle`.
pub struct LearningSession {
    course: CourseId,
    remote: Remote,
    config: SyncConfig,
    clock: Clock,
    mirror: CourseMirror,
    autosave: AutosaveService,
    active: Option<LessonId>,
}

impl LearningSession {
    /// Fetch the course and the learner's progress.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` once every configured attempt failed. Calling `load`
    /// again is the retry.
    pub async fn load(
        remote: Remote,
        course: CourseId,
        config: SyncConfig,
        clock: Clock,
    ) -> Result<Self, LoadError> {
        let snapshot = fetch_snapshot(&remote, course, config.load_attempts).await?;
        let mirror = snapshot.into_mirror();
        log::info!(
            "loaded course {course}: {} lessons, {} completed",
            mirror.hierarchy().lesson_count(),
            mirror.completed_count()
        );
        let autosave = AutosaveService::new(Arc::clone(&remote.progress), config.autosave_interval);

        Ok(Self {
            course,
            remote,
            config,
            clock,
            mirror,
            autosave,
            active: None,
        })
    }

    /// Replace local state with a fresh server snapshot.
    ///
    /// This is the only operation that may move values backwards.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the snapshot cannot be fetched; local state is kept.
    pub async fn reload(&mut self) -> Result<(), LoadError> {
        let snapshot = fetch_snapshot(&self.remote, self.course, self.config.load_attempts).await?;
        self.mirror = snapshot.into_mirror();
        if let Some(active) = self.active {
            if self.mirror.lesson(active).is_none() {
                self.active = None;
            }
        }
        Ok(())
    }

    /// Fetch server progress and merge it without regressing anything local.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the snapshot cannot be fetched; local state is kept.
    pub async fn refresh(&mut self) -> Result<Vec<Effect>, LoadError> {
        let snapshot = fetch_snapshot(&self.remote, self.course, 1).await?;
        let transition = self.mirror.merge_server_progress(snapshot.progress);
        self.mirror = transition.mirror;
        Ok(transition.effects)
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course
    }

    #[must_use]
    pub fn mirror(&self) -> &CourseMirror {
        &self.mirror
    }

    #[must_use]
    pub fn active_lesson(&self) -> Option<LessonId> {
        self.active
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Virtual time control for tests and scenario replay.
    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    #[must_use]
    pub fn autosave(&self) -> &AutosaveService {
        &self.autosave
    }

    #[must_use]
    pub fn autosave_stats(&self) -> WriteStats {
        self.autosave.stats()
    }

    #[must_use]
    pub fn sidebar(&self) -> Sidebar {
        Sidebar::build(&self.mirror, self.active)
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Open `lesson` for watching.
    ///
    /// Locked lessons are refused locally before asking the server. Progress
    /// still waiting for the previous lesson is sent and awaited first, so a
    /// lesson unlocked a moment ago opens. The server can still refuse with its
    /// own message, e.g. when that write failed.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::Denied` for locked lessons,
    /// `NavigationError::UnknownLesson` for lessons outside the course, or
    /// `NavigationError::Remote` if the server cannot be reached.
    pub async fn start_lesson(&mut self, lesson: LessonId) -> Result<(), NavigationError> {
        let progress = self
            .mirror
            .lesson(lesson)
            .ok_or(NavigationError::UnknownLesson(lesson))?;
        if !progress.is_unlocked {
            return Err(NavigationError::Denied {
                lesson,
                message: LOCKED_MESSAGE.to_string(),
            });
        }

        // A local unlock comes from the predecessor's progress; the server only
        // agrees once that write has landed.
        if let Some(previous) = self.mirror.hierarchy().predecessor(lesson) {
            self.deliver_writes_for(previous).await;
        }

        match self.remote.progress.start_lesson(lesson).await {
            Ok(()) => {}
            Err(RemoteError::Locked { message }) => {
                return Err(NavigationError::Denied { lesson, message });
            }
            Err(e) => return Err(e.into()),
        }

        log::debug!("started lesson {lesson}");
        self.active = Some(lesson);
        Ok(())
    }

    /// Stop watching. Pending writes are neither flushed nor cancelled.
    pub fn leave_lesson(&mut self) {
        self.active = None;
    }

    //
    // ─── PLAYBACK ──────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `SessionError::NoActiveLesson` when no lesson is open.
    pub fn on_progress(
        &mut self,
        percentage: f64,
        actual_percentage: f64,
    ) -> Result<Vec<Effect>, SessionError> {
        let lesson = self.require_active()?;
        self.apply(ProgressEvent::Progress {
            lesson,
            percentage,
            actual_percentage,
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoActiveLesson` when no lesson is open.
    pub fn on_pause(&mut self, percentage: f64, position: f64) -> Result<Vec<Effect>, SessionError> {
        let lesson = self.require_active()?;
        self.apply(ProgressEvent::Pause {
            lesson,
            percentage,
            position,
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoActiveLesson` when no lesson is open.
    pub fn on_complete(&mut self) -> Result<Vec<Effect>, SessionError> {
        let lesson = self.require_active()?;
        self.apply(ProgressEvent::Complete { lesson })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoActiveLesson` when no lesson is open.
    pub fn on_time_update(&mut self, seconds: f64) -> Result<Vec<Effect>, SessionError> {
        let lesson = self.require_active()?;
        self.apply(ProgressEvent::TimeUpdate { lesson, seconds })
    }

    fn require_active(&self) -> Result<LessonId, SessionError> {
        self.active.ok_or(SessionError::NoActiveLesson)
    }

    //
    // ─── QUIZZES ───────────────────────────────────────────────────────────────
    //

    /// A quiz session sharing this session's gateway, timings and clock.
    #[must_use]
    pub fn quiz_session(&self, definition: Arc<QuizDefinition>) -> QuizSession {
        QuizSession::new(
            definition,
            Arc::clone(&self.remote.quizzes),
            &self.config,
            self.clock,
        )
    }

    /// Feed a graded quiz into lesson completion. Preview results are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Progress` if the quiz's lesson is not in this course.
    pub fn apply_quiz_outcome(&mut self, outcome: &QuizOutcome) -> Result<Vec<Effect>, SessionError> {
        if outcome.preview {
            log::debug!("ignoring preview result for lesson {}", outcome.lesson_id);
            return Ok(Vec::new());
        }
        self.record_quiz_result(outcome.lesson_id, outcome.passed)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Progress` if `lesson` is not in this course.
    pub fn record_quiz_result(
        &mut self,
        lesson: LessonId,
        passed: bool,
    ) -> Result<Vec<Effect>, SessionError> {
        log::info!(
            "quiz for lesson {lesson} {}",
            if passed { "passed" } else { "failed" }
        );
        self.apply(ProgressEvent::QuizResult { lesson, passed })
    }

    //
    // ─── BACKGROUND WRITES ─────────────────────────────────────────────────────
    //

    fn apply(&mut self, event: ProgressEvent) -> Result<Vec<Effect>, SessionError> {
        let transition = self.mirror.reduce(event)?;
        self.mirror = transition.mirror;

        let now = self.clock.now();
        for effect in &transition.effects {
            if let Effect::ScheduleSave { lesson, trigger } = effect {
                if let Some(write) = self.mirror.pending_write(*lesson) {
                    self.autosave.schedule(write, *trigger, now);
                }
            }
        }
        self.autosave.dispatch_due(now);
        Ok(transition.effects)
    }

    /// Fold finished writes into the mirror and send whatever is due now.
    pub fn pump(&mut self) -> Vec<Effect> {
        let acks = self.autosave.collect_finished();
        let effects = self.fold_acks(&acks);
        self.autosave.dispatch_due(self.clock.now());
        effects
    }

    /// Send every pending write immediately, one per lesson.
    pub fn flush_now(&mut self) -> usize {
        self.autosave.flush_now()
    }

    /// Wait for outstanding writes, fold them in, and keep going until nothing
    /// due is left.
    pub async fn settle(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        loop {
            let acks = self.autosave.settle().await;
            effects.extend(self.fold_acks(&acks));
            if self.autosave.dispatch_due(self.clock.now()) == 0 {
                break;
            }
        }
        effects
    }

    async fn deliver_writes_for(&mut self, lesson: LessonId) {
        // A write queued behind an in-flight one needs a second round.
        for _ in 0..2 {
            if self.autosave.pending_write(lesson).is_none() && !self.autosave.is_in_flight(lesson) {
                return;
            }
            log::debug!("sending progress for lesson {lesson} before opening the next one");
            self.flush_now();
            self.settle().await;
        }
    }

    fn fold_acks(&mut self, acks: &[ProgressAck]) -> Vec<Effect> {
        let mut effects = Vec::new();
        for ack in acks {
            match self.mirror.reconcile_ack(ack) {
                Ok(transition) => {
                    self.mirror = transition.mirror;
                    effects.extend(transition.effects);
                }
                Err(e) => log::warn!("discarding acknowledgement for lesson {}: {e}", ack.lesson_id),
            }
        }
        effects
    }
}

async fn fetch_snapshot(
    remote: &Remote,
    course: CourseId,
    attempts: u32,
) -> Result<ServerSnapshot, LoadError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match remote.courses.fetch_learning(course).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if attempt < attempts => {
                log::warn!("loading course {course} failed (attempt {attempt}/{attempts}): {e}");
                attempt += 1;
            }
            Err(source) => return Err(LoadError::Remote { course, source }),
        }
    }
}
