//! Single-hop completion and unlock propagation over the course hierarchy.
//!
//! These functions mutate a lesson map that the caller owns; the reducer in
//! `mirror` hands them a fresh copy of the previous state.

use std::collections::BTreeMap;

use crate::model::{CourseHierarchy, LessonId, LessonProgress, ProgressError};

/// What a propagation step changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnlockOutcome {
    /// The triggering lesson became completed by this step.
    pub completed: bool,
    /// The triggering lesson is watched but waits on its quiz.
    pub quiz_pending: bool,
    /// The successor that became unlocked by this step.
    pub unlocked: Option<LessonId>,
}

fn entry_mut(
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
    lesson: LessonId,
) -> Result<&mut LessonProgress, ProgressError> {
    lessons
        .get_mut(&lesson)
        .ok_or(ProgressError::UnknownLesson(lesson))
}

/// Handle the one-time crossing of the completion threshold for `lesson`.
///
/// 1. completes the lesson unless it waits on a required quiz
/// 2. unlocks the reading-order successor, if there is one
///
/// Nothing past the successor is touched.
///
/// # Errors
///
/// Returns `ProgressError::UnknownLesson` if `lesson` is not in `hierarchy`.
pub fn on_threshold_crossed(
    hierarchy: &CourseHierarchy,
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
    lesson: LessonId,
) -> Result<UnlockOutcome, ProgressError> {
    let quiz_required = hierarchy
        .lesson(lesson)
        .ok_or(ProgressError::UnknownLesson(lesson))?
        .quiz_required();

    let entry = entry_mut(lessons, lesson)?;
    let quiz_satisfied = !quiz_required || entry.quiz_passed == Some(true);
    let completed = quiz_satisfied && !entry.is_completed;
    if completed {
        entry.is_completed = true;
    }

    let unlocked = unlock_successor(hierarchy, lessons, lesson);

    Ok(UnlockOutcome {
        completed,
        quiz_pending: !quiz_satisfied,
        unlocked,
    })
}

/// Record a quiz result for `lesson`.
///
/// A pass completes a lesson whose video is already past the threshold. A
/// failure never revokes an earlier pass or a completion.
///
/// # Errors
///
/// Returns `ProgressError::UnknownLesson` if `lesson` is not in `hierarchy`.
pub fn on_quiz_result(
    hierarchy: &CourseHierarchy,
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
    lesson: LessonId,
    passed: bool,
) -> Result<UnlockOutcome, ProgressError> {
    if !hierarchy.contains(lesson) {
        return Err(ProgressError::UnknownLesson(lesson));
    }

    let entry = entry_mut(lessons, lesson)?;
    if !passed {
        if entry.quiz_passed != Some(true) {
            entry.quiz_passed = Some(false);
        }
        return Ok(UnlockOutcome {
            quiz_pending: !entry.is_completed && entry.watch_percentage.reaches_threshold(),
            ..UnlockOutcome::default()
        });
    }

    entry.quiz_passed = Some(true);
    if !entry.watch_percentage.reaches_threshold() {
        return Ok(UnlockOutcome::default());
    }

    let completed = !entry.is_completed;
    entry.is_completed = true;
    let unlocked = unlock_successor(hierarchy, lessons, lesson);

    Ok(UnlockOutcome {
        completed,
        quiz_pending: false,
        unlocked,
    })
}

/// Unlock the lesson after `lesson`, returning it if this call changed it.
pub fn unlock_successor(
    hierarchy: &CourseHierarchy,
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
    lesson: LessonId,
) -> Option<LessonId> {
    let edge = hierarchy.unlock_edge(lesson)?;
    let next = lessons.entry(edge.to).or_default();
    if next.is_unlocked {
        return None;
    }
    next.is_unlocked = true;
    log::info!(
        "lesson {} unlocked by lesson {}{}",
        edge.to,
        edge.from,
        if edge.crosses_chapter { " (next chapter)" } else { "" }
    );
    Some(edge.to)
}

/// Fill in unlock flags for a freshly loaded snapshot.
///
/// The first lesson is always open, and a lesson whose predecessor is
/// completed or watched past the threshold is open. Flags already set by the
/// server are kept.
pub fn derive_unlocks(
    hierarchy: &CourseHierarchy,
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
) {
    let mut previous_opens_next = true;
    for id in hierarchy.reading_order() {
        let entry = lessons.entry(*id).or_default();
        if previous_opens_next {
            entry.is_unlocked = true;
        }
        previous_opens_next = entry.is_completed || entry.watch_percentage.reaches_threshold();
    }
}

/// Complete lessons a snapshot lists past the threshold with their quiz
/// requirement met but without the completed flag.
///
/// Their cells are seeded past the threshold and cannot cross it again, so this
/// is the only point where they can complete.
pub fn derive_completions(
    hierarchy: &CourseHierarchy,
    lessons: &mut BTreeMap<LessonId, LessonProgress>,
) {
    for id in hierarchy.reading_order() {
        let quiz_required = hierarchy.lesson(*id).is_some_and(|l| l.quiz_required());
        if let Some(entry) = lessons.get_mut(id) {
            let quiz_satisfied = !quiz_required || entry.quiz_passed == Some(true);
            if !entry.is_completed && entry.watch_percentage.reaches_threshold() && quiz_satisfied {
                log::debug!("lesson {id} loaded past the threshold; marking it completed");
                entry.is_completed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chapter, ChapterId, CourseId, Lesson, Percentage, QuizId};

    fn course() -> CourseHierarchy {
        CourseHierarchy::new(
            CourseId::new(1),
            vec![
                Chapter::new(
                    ChapterId::new(1),
                    "One",
                    1,
                    vec![
                        Lesson::new(LessonId::new(1), "A", 1),
                        Lesson::new(LessonId::new(2), "B", 2).with_quiz(QuizId::new(20), true),
                    ],
                ),
                Chapter::new(
                    ChapterId::new(2),
                    "Two",
                    2,
                    vec![
                        Lesson::new(LessonId::new(3), "C", 1),
                        Lesson::new(LessonId::new(4), "D", 2),
                    ],
                ),
            ],
        )
        .unwrap()
    }

    fn blank(course: &CourseHierarchy) -> BTreeMap<LessonId, LessonProgress> {
        let mut lessons: BTreeMap<_, _> = course
            .reading_order()
            .iter()
            .map(|id| (*id, LessonProgress::locked()))
            .collect();
        derive_unlocks(course, &mut lessons);
        lessons
    }

    fn watched(lessons: &mut BTreeMap<LessonId, LessonProgress>, id: u64) {
        lessons.get_mut(&LessonId::new(id)).unwrap().watch_percentage =
            Percentage::new(97.0).unwrap();
    }

    #[test]
    fn derive_opens_only_first_lesson_of_blank_course() {
        let course = course();
        let lessons = blank(&course);
        let open: Vec<u64> = lessons
            .iter()
            .filter(|(_, p)| p.is_unlocked)
            .map(|(id, _)| id.value())
            .collect();
        assert_eq!(open, vec![1]);
    }

    #[test]
    fn crossing_completes_and_unlocks_exactly_one_successor() {
        let course = course();
        let mut lessons = blank(&course);
        // Lesson 3 is already done from some earlier session; it must not cascade.
        lessons.get_mut(&LessonId::new(3)).unwrap().is_completed = true;
        watched(&mut lessons, 1);

        let before = lessons.clone();
        let outcome = on_threshold_crossed(&course, &mut lessons, LessonId::new(1)).unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.unlocked, Some(LessonId::new(2)));
        for (id, progress) in &lessons {
            if *id != LessonId::new(2) {
                assert_eq!(progress.is_unlocked, before[id].is_unlocked, "lesson {id}");
            }
        }
    }

    #[test]
    fn quiz_gated_lesson_unlocks_navigation_but_stays_pending() {
        let course = course();
        let mut lessons = blank(&course);
        lessons.get_mut(&LessonId::new(2)).unwrap().is_unlocked = true;
        watched(&mut lessons, 2);

        let outcome = on_threshold_crossed(&course, &mut lessons, LessonId::new(2)).unwrap();
        assert!(!outcome.completed);
        assert!(outcome.quiz_pending);
        assert_eq!(outcome.unlocked, Some(LessonId::new(3)));
        assert!(!lessons[&LessonId::new(2)].is_completed);

        let passed = on_quiz_result(&course, &mut lessons, LessonId::new(2), true).unwrap();
        assert!(passed.completed);
        assert_eq!(passed.unlocked, None);
        assert!(lessons[&LessonId::new(2)].is_completed);
    }

    #[test]
    fn failed_quiz_never_revokes_a_pass() {
        let course = course();
        let mut lessons = blank(&course);
        watched(&mut lessons, 2);
        on_quiz_result(&course, &mut lessons, LessonId::new(2), true).unwrap();
        let outcome = on_quiz_result(&course, &mut lessons, LessonId::new(2), false).unwrap();
        assert_eq!(outcome, UnlockOutcome::default());
        assert_eq!(lessons[&LessonId::new(2)].quiz_passed, Some(true));
        assert!(lessons[&LessonId::new(2)].is_completed);
    }

    #[test]
    fn quiz_pass_before_threshold_waits_for_video() {
        let course = course();
        let mut lessons = blank(&course);
        let outcome = on_quiz_result(&course, &mut lessons, LessonId::new(2), true).unwrap();
        assert!(!outcome.completed);

        watched(&mut lessons, 2);
        let crossed = on_threshold_crossed(&course, &mut lessons, LessonId::new(2)).unwrap();
        assert!(crossed.completed);
        assert!(!crossed.quiz_pending);
    }

    #[test]
    fn final_lesson_has_no_successor() {
        let course = course();
        let mut lessons = blank(&course);
        watched(&mut lessons, 4);
        let before = lessons.clone();
        let outcome = on_threshold_crossed(&course, &mut lessons, LessonId::new(4)).unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.unlocked, None);
        for (id, progress) in &lessons {
            assert_eq!(progress.is_unlocked, before[id].is_unlocked);
        }
    }

    #[test]
    fn unknown_lesson_is_an_error() {
        let course = course();
        let mut lessons = blank(&course);
        assert_eq!(
            on_threshold_crossed(&course, &mut lessons, LessonId::new(42)).unwrap_err(),
            ProgressError::UnknownLesson(LessonId::new(42))
        );
    }

    #[test]
    fn derive_keeps_server_unlocks_and_follows_watched_predecessors() {
        let course = course();
        let mut lessons: BTreeMap<_, _> = course
            .reading_order()
            .iter()
            .map(|id| (*id, LessonProgress::locked()))
            .collect();
        watched(&mut lessons, 1);
        lessons.get_mut(&LessonId::new(4)).unwrap().is_unlocked = true;
        derive_unlocks(&course, &mut lessons);

        assert!(lessons[&LessonId::new(1)].is_unlocked);
        assert!(lessons[&LessonId::new(2)].is_unlocked);
        assert!(!lessons[&LessonId::new(3)].is_unlocked);
        assert!(lessons[&LessonId::new(4)].is_unlocked);
    }

    #[test]
    fn loaded_past_threshold_completes_unless_quiz_is_outstanding() {
        let course = course();
        let mut lessons = blank(&course);
        watched(&mut lessons, 1);
        watched(&mut lessons, 2);
        watched(&mut lessons, 3);
        lessons.get_mut(&LessonId::new(3)).unwrap().quiz_passed = Some(false);
        derive_completions(&course, &mut lessons);

        assert!(lessons[&LessonId::new(1)].is_completed);
        assert!(!lessons[&LessonId::new(2)].is_completed);
        assert!(lessons[&LessonId::new(3)].is_completed);
        assert!(!lessons[&LessonId::new(4)].is_completed);

        lessons.get_mut(&LessonId::new(2)).unwrap().quiz_passed = Some(true);
        derive_completions(&course, &mut lessons);
        assert!(lessons[&LessonId::new(2)].is_completed);
    }
}
