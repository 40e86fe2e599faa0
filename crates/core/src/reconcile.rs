//! Folding authoritative server state into the local mirror.
//!
//! A fresh snapshot replaces everything. Anything that arrives later during the
//! session is merged so that nothing the learner can see moves backwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::mirror::CourseMirror;
use crate::model::{CourseHierarchy, LessonId, LessonProgress};
use crate::unlock;

/// Hierarchy and per-lesson progress as the server reported them on load.
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub hierarchy: CourseHierarchy,
    pub progress: Vec<(LessonId, LessonProgress)>,
}

impl ServerSnapshot {
    /// Build the session's starting mirror from this snapshot.
    #[must_use]
    pub fn into_mirror(self) -> CourseMirror {
        apply_server_snapshot(Arc::new(self.hierarchy), self.progress)
    }
}

/// How a server value combines with the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Take the server value as-is. Only valid for a fresh load.
    Authoritative,
    /// Keep whichever side is further along, field by field.
    PreferAdvanced,
}

/// Initial load: lessons missing from `progress` start locked and empty, and
/// completion and unlock flags are derived from the hierarchy on top of what
/// the server sent.
///
/// Entries for lessons outside the hierarchy are dropped.
pub fn apply_server_snapshot(
    hierarchy: Arc<CourseHierarchy>,
    progress: impl IntoIterator<Item = (LessonId, LessonProgress)>,
) -> CourseMirror {
    let mut lessons: BTreeMap<LessonId, LessonProgress> = hierarchy
        .reading_order()
        .iter()
        .map(|id| (*id, LessonProgress::locked()))
        .collect();

    for (id, server) in progress {
        match lessons.get_mut(&id) {
            Some(entry) => *entry = merge_lesson(MergePolicy::Authoritative, entry, &server),
            None => log::warn!("snapshot carries progress for unknown lesson {id}; ignoring"),
        }
    }

    unlock::derive_completions(&hierarchy, &mut lessons);
    unlock::derive_unlocks(&hierarchy, &mut lessons);
    CourseMirror::from_snapshot(hierarchy, lessons)
}

/// Combine one lesson's local and server state under `policy`.
#[must_use]
pub fn merge_lesson(
    policy: MergePolicy,
    local: &LessonProgress,
    server: &LessonProgress,
) -> LessonProgress {
    match policy {
        MergePolicy::Authoritative => server.clone(),
        MergePolicy::PreferAdvanced => {
            let server_ahead = server.watch_percentage > local.watch_percentage;
            LessonProgress {
                watch_percentage: local.watch_percentage.max(server.watch_percentage),
                current_position: if server_ahead {
                    server.current_position
                } else {
                    local.current_position
                },
                total_watch_time: local.total_watch_time.max(server.total_watch_time),
                is_completed: local.is_completed || server.is_completed,
                is_unlocked: local.is_unlocked || server.is_unlocked,
                quiz_passed: merge_quiz_passed(local.quiz_passed, server.quiz_passed),
            }
        }
    }
}

fn merge_quiz_passed(local: Option<bool>, server: Option<bool>) -> Option<bool> {
    match (local, server) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), _) | (_, Some(false)) => Some(false),
        (None, None) => None,
    }
}
