//! In-memory mirror of the course hierarchy annotated with progress.
//!
//! Every transition is a pure function of the previous mirror and one event,
//! so two callbacks landing back to back (a timer tick and a pause) can never
//! lose each other's update.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{
    CourseHierarchy, LessonId, LessonProgress, LessonStatus, PendingWrite, Percentage,
    ProgressError,
};
use crate::progress::{Freshness, Observation, ProgressCells};
use crate::reconcile::{MergePolicy, merge_lesson};
use crate::unlock::{self, UnlockOutcome};

/// Largest playhead jump still counted as continuous playback.
const MAX_CONTINUOUS_STEP_SECS: f64 = 2.0;

//
// ─── EVENTS & EFFECTS ──────────────────────────────────────────────────────────
//

/// Discrete inputs from the playback and quiz collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Periodic progress report. `percentage` feeds the progress cell;
    /// `actual_percentage` (share of the video really played) is informational.
    Progress {
        lesson: LessonId,
        percentage: f64,
        actual_percentage: f64,
    },
    /// Playhead moved to `seconds`.
    TimeUpdate { lesson: LessonId, seconds: f64 },
    Pause {
        lesson: LessonId,
        percentage: f64,
        position: f64,
    },
    /// The player reached the end of the video.
    Complete { lesson: LessonId },
    /// The quiz subsystem graded an attempt for this lesson.
    QuizResult { lesson: LessonId, passed: bool },
}

/// Why a lesson's progress should be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveTrigger {
    /// Playback is running; write on the autosave interval.
    Interval,
    Pause,
    ThresholdCrossed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ScheduleSave { lesson: LessonId, trigger: SaveTrigger },
    Completed(LessonId),
    QuizPending(LessonId),
    Unlocked(LessonId),
}

/// Next mirror plus what the transition asks the outside world to do.
#[derive(Debug, Clone)]
pub struct Transition {
    pub mirror: CourseMirror,
    pub effects: Vec<Effect>,
}

/// Server acknowledgement of an autosave write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressAck {
    pub lesson_id: LessonId,
    pub watch_percentage: Percentage,
    pub is_completed: bool,
    /// Lesson the server opened as a consequence of this write, if it says so.
    pub next_unlocked: Option<LessonId>,
}

//
// ─── MIRROR ────────────────────────────────────────────────────────────────────
//

/// Hierarchy plus two tiers of progress: `confirmed` is the last state the
/// server reported, `lessons` is that state overlaid with local advances.
#[derive(Debug, Clone)]
pub struct CourseMirror {
    hierarchy: Arc<CourseHierarchy>,
    lessons: BTreeMap<LessonId, LessonProgress>,
    confirmed: BTreeMap<LessonId, LessonProgress>,
    cells: ProgressCells,
}

impl CourseMirror {
    /// Build from an authoritative snapshot; values are taken as-is.
    pub(crate) fn from_snapshot(
        hierarchy: Arc<CourseHierarchy>,
        lessons: BTreeMap<LessonId, LessonProgress>,
    ) -> Self {
        let mut cells = ProgressCells::new();
        for (id, progress) in &lessons {
            cells.reconcile(*id, progress.watch_percentage, Freshness::FreshLoad);
        }
        Self {
            hierarchy,
            confirmed: lessons.clone(),
            lessons,
            cells,
        }
    }

    #[must_use]
    pub fn hierarchy(&self) -> &CourseHierarchy {
        &self.hierarchy
    }

    #[must_use]
    pub fn shared_hierarchy(&self) -> Arc<CourseHierarchy> {
        Arc::clone(&self.hierarchy)
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&LessonProgress> {
        self.lessons.get(&id)
    }

    #[must_use]
    pub fn confirmed(&self, id: LessonId) -> Option<&LessonProgress> {
        self.confirmed.get(&id)
    }

    /// Lessons in reading order.
    pub fn lessons(&self) -> impl Iterator<Item = (LessonId, &LessonProgress)> + '_ {
        self.hierarchy
            .reading_order()
            .iter()
            .filter_map(|id| self.lessons.get(id).map(|p| (*id, p)))
    }

    #[must_use]
    pub fn status(&self, id: LessonId) -> Option<LessonStatus> {
        let quiz_required = self.hierarchy.lesson(id)?.quiz_required();
        Some(self.lessons.get(&id)?.status(quiz_required))
    }

    /// Local state is ahead of what the server last confirmed.
    #[must_use]
    pub fn is_unsynced(&self, id: LessonId) -> bool {
        match (self.lessons.get(&id), self.confirmed.get(&id)) {
            (Some(local), Some(server)) => {
                local.watch_percentage > server.watch_percentage
                    || (local.is_completed && !server.is_completed)
            }
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Payload for the next autosave of `id`, built from current values.
    #[must_use]
    pub fn pending_write(&self, id: LessonId) -> Option<PendingWrite> {
        self.lessons
            .get(&id)
            .map(|progress| PendingWrite::from_progress(id, progress))
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.lessons.values().filter(|p| p.is_completed).count()
    }

    /// Apply one event to a copy of this mirror.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownLesson` for lessons outside the course.
    pub fn reduce(&self, event: ProgressEvent) -> Result<Transition, ProgressError> {
        let mut next = self.clone();
        let mut effects = Vec::new();

        match event {
            ProgressEvent::Progress {
                lesson,
                percentage,
                actual_percentage,
            } => {
                next.ensure_known(lesson)?;
                log::trace!("progress {lesson}: {percentage} (actual {actual_percentage})");
                next.observe(lesson, percentage, &mut effects)?;
                effects.push(Effect::ScheduleSave {
                    lesson,
                    trigger: SaveTrigger::Interval,
                });
            }
            ProgressEvent::TimeUpdate { lesson, seconds } => {
                next.ensure_known(lesson)?;
                if seconds.is_finite() && seconds >= 0.0 {
                    let entry = next.entry_mut(lesson)?;
                    let step = seconds - entry.current_position;
                    if step > 0.0 && step <= MAX_CONTINUOUS_STEP_SECS {
                        entry.total_watch_time += step;
                    }
                    entry.current_position = seconds;
                    effects.push(Effect::ScheduleSave {
                        lesson,
                        trigger: SaveTrigger::Interval,
                    });
                }
            }
            ProgressEvent::Pause {
                lesson,
                percentage,
                position,
            } => {
                next.ensure_known(lesson)?;
                next.observe(lesson, percentage, &mut effects)?;
                if position.is_finite() && position >= 0.0 {
                    next.entry_mut(lesson)?.current_position = position;
                }
                effects.push(Effect::ScheduleSave {
                    lesson,
                    trigger: SaveTrigger::Pause,
                });
            }
            ProgressEvent::Complete { lesson } => {
                next.ensure_known(lesson)?;
                next.observe(lesson, 100.0, &mut effects)?;
            }
            ProgressEvent::QuizResult { lesson, passed } => {
                next.ensure_known(lesson)?;
                let outcome =
                    unlock::on_quiz_result(&next.hierarchy, &mut next.lessons, lesson, passed)?;
                push_outcome(lesson, outcome, &mut effects);
            }
        }

        Ok(Transition {
            mirror: next,
            effects,
        })
    }

    /// Fold a server acknowledgement in without regressing anything local.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownLesson` for lessons outside the course.
    pub fn reconcile_ack(&self, ack: &ProgressAck) -> Result<Transition, ProgressError> {
        let mut next = self.clone();
        let mut effects = Vec::new();
        let lesson = ack.lesson_id;
        next.ensure_known(lesson)?;

        let confirmed = next.confirmed.entry(lesson).or_default();
        confirmed.watch_percentage = ack.watch_percentage;
        confirmed.is_completed = ack.is_completed;

        let observation = next
            .cells
            .reconcile(lesson, ack.watch_percentage, Freshness::InSession);
        next.apply_observation(lesson, observation, &mut effects)?;

        if ack.is_completed {
            let entry = next.entry_mut(lesson)?;
            if !entry.is_completed {
                entry.is_completed = true;
                effects.push(Effect::Completed(lesson));
            }
        }

        if let Some(opened) = ack.next_unlocked {
            if let Some(entry) = next.lessons.get_mut(&opened) {
                if !entry.is_unlocked {
                    entry.is_unlocked = true;
                    effects.push(Effect::Unlocked(opened));
                }
            } else {
                log::warn!("server unlocked lesson {opened}, which is not in this course");
            }
        }

        // The server already holds what it just acknowledged.
        effects.retain(|effect| !matches!(effect, Effect::ScheduleSave { .. }));

        Ok(Transition {
            mirror: next,
            effects,
        })
    }

    /// Merge a server progress listing fetched during the session.
    ///
    /// Each lesson is combined with `MergePolicy::PreferAdvanced`; lessons the
    /// course does not contain are skipped.
    pub fn merge_server_progress(
        &self,
        progress: impl IntoIterator<Item = (LessonId, LessonProgress)>,
    ) -> Transition {
        let mut next = self.clone();
        let mut effects = Vec::new();

        for (lesson, server) in progress {
            let Some(local) = next.lessons.get(&lesson).cloned() else {
                log::warn!("server progress for unknown lesson {lesson}; ignoring");
                continue;
            };
            next.confirmed.insert(lesson, server.clone());

            let merged = merge_lesson(MergePolicy::PreferAdvanced, &local, &server);
            let observation =
                next.cells
                    .reconcile(lesson, server.watch_percentage, Freshness::InSession);
            if let Some(entry) = next.lessons.get_mut(&lesson) {
                *entry = LessonProgress {
                    watch_percentage: observation.applied,
                    ..merged
                };
            }
            if observation.crossed_threshold {
                if let Ok(outcome) =
                    unlock::on_threshold_crossed(&next.hierarchy, &mut next.lessons, lesson)
                {
                    if outcome.quiz_pending {
                        effects.push(Effect::QuizPending(lesson));
                    }
                }
            }
        }

        for (lesson, now) in next.lessons() {
            let Some(before) = self.lessons.get(&lesson) else {
                continue;
            };
            if now.is_completed && !before.is_completed {
                effects.push(Effect::Completed(lesson));
            }
            if now.is_unlocked && !before.is_unlocked {
                effects.push(Effect::Unlocked(lesson));
            }
        }

        Transition {
            mirror: next,
            effects,
        }
    }

    fn ensure_known(&self, lesson: LessonId) -> Result<(), ProgressError> {
        if self.lessons.contains_key(&lesson) {
            Ok(())
        } else {
            Err(ProgressError::UnknownLesson(lesson))
        }
    }

    fn entry_mut(&mut self, lesson: LessonId) -> Result<&mut LessonProgress, ProgressError> {
        self.lessons
            .get_mut(&lesson)
            .ok_or(ProgressError::UnknownLesson(lesson))
    }

    fn observe(
        &mut self,
        lesson: LessonId,
        raw: f64,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ProgressError> {
        let observation = self.cells.observe(lesson, raw);
        self.apply_observation(lesson, observation, effects)
    }

    fn apply_observation(
        &mut self,
        lesson: LessonId,
        observation: Observation,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ProgressError> {
        self.entry_mut(lesson)?.watch_percentage = observation.applied;
        if observation.crossed_threshold {
            log::debug!("lesson {lesson} crossed the completion threshold");
            let outcome = unlock::on_threshold_crossed(&self.hierarchy, &mut self.lessons, lesson)?;
            push_outcome(lesson, outcome, effects);
            effects.push(Effect::ScheduleSave {
                lesson,
                trigger: SaveTrigger::ThresholdCrossed,
            });
        }
        Ok(())
    }
}

fn push_outcome(lesson: LessonId, outcome: UnlockOutcome, effects: &mut Vec<Effect>) {
    if outcome.completed {
        log::info!("lesson {lesson} completed");
        effects.push(Effect::Completed(lesson));
    }
    if outcome.quiz_pending {
        effects.push(Effect::QuizPending(lesson));
    }
    if let Some(next) = outcome.unlocked {
        effects.push(Effect::Unlocked(next));
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
