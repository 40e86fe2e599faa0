use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use course_core::mirror::ProgressAck;
use course_core::model::{
    CourseHierarchy, CourseId, LessonId, LessonProgress, PendingWrite, QuizAttemptState,
    QuizDefinition, QuizId, quiz,
};
use course_core::reconcile::ServerSnapshot;
use course_core::unlock;

use crate::gateway::{
    CourseGateway, ProgressGateway, QuizGateway, QuizSubmission, RemoteError, SavedQuizProgress,
    SubmissionResult,
};

const LOCKED_MESSAGE: &str = "finish the previous lesson to unlock this one";

/// Every request the in-memory server received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    FetchLearning(CourseId),
    StartLesson(LessonId),
    SaveLessonProgress(PendingWrite),
    LoadQuizProgress(QuizId),
    SaveQuizProgress(QuizId, SavedQuizProgress),
    ClearQuizProgress(QuizId),
    SubmitQuiz(QuizId, QuizSubmission),
}

#[derive(Debug, Default)]
struct ServerState {
    courses: HashMap<CourseId, Arc<CourseHierarchy>>,
    progress: BTreeMap<LessonId, LessonProgress>,
    quizzes: HashMap<QuizId, QuizDefinition>,
    saved_quizzes: HashMap<QuizId, SavedQuizProgress>,
    calls: Vec<RemoteCall>,
    failing_progress_writes: usize,
    failing_loads: usize,
    failing_quiz_loads: usize,
}

impl ServerState {
    fn course_of(&self, lesson: LessonId) -> Option<Arc<CourseHierarchy>> {
        self.courses
            .values()
            .find(|hierarchy| hierarchy.contains(lesson))
            .cloned()
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

/// In-memory stand-in for the learning backend, for tests and scenario replay.
///
/// Behaves like the real server for the parts the client relies on: it keeps
/// the highest percentage it was sent, completes and unlocks with the same
/// rules as the client, and grades quiz submissions. Requests are recorded and
/// failures can be injected per endpoint.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    inner: Arc<Mutex<ServerState>>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, ServerState>, RemoteError> {
        self.inner
            .lock()
            .map_err(|e| RemoteError::Connection(e.to_string()))
    }

    fn inspect(&self) -> MutexGuard<'_, ServerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a course and the learner's stored progress for it.
    pub fn insert_course(
        &self,
        hierarchy: CourseHierarchy,
        progress: impl IntoIterator<Item = (LessonId, LessonProgress)>,
    ) {
        let mut lessons: BTreeMap<LessonId, LessonProgress> = hierarchy
            .reading_order()
            .iter()
            .map(|id| (*id, LessonProgress::locked()))
            .collect();
        for (id, stored) in progress {
            if lessons.contains_key(&id) {
                lessons.insert(id, stored);
            }
        }
        unlock::derive_completions(&hierarchy, &mut lessons);
        unlock::derive_unlocks(&hierarchy, &mut lessons);

        let mut state = self.inspect();
        state.progress.extend(lessons);
        state.courses.insert(hierarchy.id(), Arc::new(hierarchy));
    }

    pub fn insert_quiz(&self, definition: QuizDefinition) {
        self.inspect().quizzes.insert(definition.id(), definition);
    }

    /// Store a half-finished attempt as if an earlier visit had saved it.
    pub fn insert_saved_quiz(&self, quiz: QuizId, progress: SavedQuizProgress) {
        self.inspect().saved_quizzes.insert(quiz, progress);
    }

    /// The next `count` lesson progress writes fail with a transport error.
    pub fn fail_next_progress_writes(&self, count: usize) {
        self.inspect().failing_progress_writes = count;
    }

    /// The next `count` course loads fail with a transport error.
    pub fn fail_next_loads(&self, count: usize) {
        self.inspect().failing_loads = count;
    }

    /// The next `count` saved-quiz lookups fail with a transport error.
    pub fn fail_next_quiz_loads(&self, count: usize) {
        self.inspect().failing_quiz_loads = count;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inspect().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inspect().calls.clear();
    }

    /// Lesson progress writes received so far, failed ones included.
    #[must_use]
    pub fn progress_writes(&self) -> Vec<PendingWrite> {
        self.inspect()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::SaveLessonProgress(write) => Some(write.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn lesson_progress(&self, lesson: LessonId) -> Option<LessonProgress> {
        self.inspect().progress.get(&lesson).cloned()
    }

    #[must_use]
    pub fn saved_quiz(&self, quiz: QuizId) -> Option<SavedQuizProgress> {
        self.inspect().saved_quizzes.get(&quiz).cloned()
    }
}

#[async_trait]
impl CourseGateway for InMemoryGateway {
    async fn fetch_learning(&self, course: CourseId) -> Result<ServerSnapshot, RemoteError> {
        let mut state = self.state()?;
        state.calls.push(RemoteCall::FetchLearning(course));
        if take_failure(&mut state.failing_loads) {
            return Err(RemoteError::Transport("injected load failure".into()));
        }

        let hierarchy = state.courses.get(&course).ok_or(RemoteError::NotFound)?;
        let progress = hierarchy
            .reading_order()
            .iter()
            .filter_map(|id| state.progress.get(id).map(|p| (*id, p.clone())))
            .collect();
        Ok(ServerSnapshot {
            hierarchy: hierarchy.as_ref().clone(),
            progress,
        })
    }
}

#[async_trait]
impl ProgressGateway for InMemoryGateway {
    async fn start_lesson(&self, lesson: LessonId) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.calls.push(RemoteCall::StartLesson(lesson));
        match state.progress.get(&lesson) {
            None => Err(RemoteError::NotFound),
            Some(progress) if !progress.is_unlocked => Err(RemoteError::Locked {
                message: LOCKED_MESSAGE.into(),
            }),
            Some(_) => Ok(()),
        }
    }

    async fn save_lesson_progress(&self, write: &PendingWrite) -> Result<ProgressAck, RemoteError> {
        let mut state = self.state()?;
        state
            .calls
            .push(RemoteCall::SaveLessonProgress(write.clone()));
        if take_failure(&mut state.failing_progress_writes) {
            return Err(RemoteError::Transport("injected write failure".into()));
        }

        let lesson = write.lesson_id;
        let hierarchy = state.course_of(lesson).ok_or(RemoteError::NotFound)?;
        let was_past_threshold = {
            let entry = state.progress.entry(lesson).or_default();
            let before = entry.watch_percentage.reaches_threshold();
            entry.watch_percentage = entry.watch_percentage.max(write.watch_percentage);
            entry.current_position = write.current_position;
            entry.total_watch_time = entry.total_watch_time.max(write.total_watch_time);
            before
        };

        let mut next_unlocked = None;
        let now_past_threshold = state
            .progress
            .get(&lesson)
            .is_some_and(|p| p.watch_percentage.reaches_threshold());
        if now_past_threshold && !was_past_threshold {
            let outcome = unlock::on_threshold_crossed(&hierarchy, &mut state.progress, lesson)
                .map_err(|_| RemoteError::NotFound)?;
            next_unlocked = outcome.unlocked;
        }

        let stored = state.progress.get(&lesson).ok_or(RemoteError::NotFound)?;
        Ok(ProgressAck {
            lesson_id: lesson,
            watch_percentage: stored.watch_percentage,
            is_completed: stored.is_completed,
            next_unlocked,
        })
    }
}

#[async_trait]
impl QuizGateway for InMemoryGateway {
    async fn load_quiz_progress(
        &self,
        quiz: QuizId,
    ) -> Result<Option<SavedQuizProgress>, RemoteError> {
        let mut state = self.state()?;
        state.calls.push(RemoteCall::LoadQuizProgress(quiz));
        if take_failure(&mut state.failing_quiz_loads) {
            return Err(RemoteError::Transport("injected quiz load failure".into()));
        }
        Ok(state.saved_quizzes.get(&quiz).cloned())
    }

    async fn save_quiz_progress(
        &self,
        quiz: QuizId,
        progress: &SavedQuizProgress,
    ) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state
            .calls
            .push(RemoteCall::SaveQuizProgress(quiz, progress.clone()));
        state.saved_quizzes.insert(quiz, progress.clone());
        Ok(())
    }

    async fn clear_quiz_progress(&self, quiz: QuizId) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.calls.push(RemoteCall::ClearQuizProgress(quiz));
        state.saved_quizzes.remove(&quiz);
        Ok(())
    }

    async fn submit_quiz(
        &self,
        quiz: QuizId,
        submission: &QuizSubmission,
    ) -> Result<SubmissionResult, RemoteError> {
        let mut state = self.state()?;
        state
            .calls
            .push(RemoteCall::SubmitQuiz(quiz, submission.clone()));

        let definition = state.quizzes.get(&quiz).ok_or(RemoteError::NotFound)?;
        let attempt = QuizAttemptState::from_wire(definition, &submission.answers, 0).map_err(
            |e| RemoteError::Status {
                status: 422,
                message: e.to_string(),
            },
        )?;
        let grade = quiz::grade(definition, &attempt);
        let lesson = definition.lesson_id();

        if let Some(hierarchy) = state.course_of(lesson) {
            unlock::on_quiz_result(&hierarchy, &mut state.progress, lesson, grade.passed)
                .map_err(|_| RemoteError::NotFound)?;
        }

        Ok(SubmissionResult {
            passed: grade.passed,
            score: grade.score,
        })
    }
}
