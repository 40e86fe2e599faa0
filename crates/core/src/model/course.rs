use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::ids::{ChapterId, CourseId, LessonId, QuizId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HierarchyError {
    #[error("course has no chapters")]
    EmptyCourse,

    #[error("chapter {0} has no lessons")]
    EmptyChapter(ChapterId),

    #[error("chapter order {0} is used more than once")]
    DuplicateChapterOrder(u32),

    #[error("lesson order {order} is used more than once in chapter {chapter}")]
    DuplicateLessonOrder { chapter: ChapterId, order: u32 },

    #[error("chapter {0} appears more than once")]
    DuplicateChapter(ChapterId),

    #[error("lesson {0} appears more than once")]
    DuplicateLesson(LessonId),

    #[error("lesson {0} requires a quiz but has none attached")]
    MissingQuiz(LessonId),
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    id: LessonId,
    title: String,
    order: u32,
    quiz: Option<QuizId>,
    quiz_required: bool,
}

impl Lesson {
    #[must_use]
    pub fn new(id: LessonId, title: impl Into<String>, order: u32) -> Self {
        Self {
            id,
            title: title.into(),
            order,
            quiz: None,
            quiz_required: false,
        }
    }

    /// Attach a quiz. When `required` is set the lesson only completes after a pass.
    #[must_use]
    pub fn with_quiz(mut self, quiz: QuizId, required: bool) -> Self {
        self.quiz = Some(quiz);
        self.quiz_required = required;
        self
    }

    /// Mark the lesson as quiz-gated without knowing the quiz id yet.
    ///
    /// Hierarchy construction rejects this unless a quiz is attached.
    #[must_use]
    pub fn requiring_quiz(mut self) -> Self {
        self.quiz_required = true;
        self
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn quiz(&self) -> Option<QuizId> {
        self.quiz
    }

    #[must_use]
    pub fn quiz_required(&self) -> bool {
        self.quiz_required
    }
}

//
// ─── CHAPTER ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    id: ChapterId,
    title: String,
    order: u32,
    lessons: Vec<Lesson>,
}

impl Chapter {
    #[must_use]
    pub fn new(id: ChapterId, title: impl Into<String>, order: u32, lessons: Vec<Lesson>) -> Self {
        Self {
            id,
            title: title.into(),
            order,
            lessons,
        }
    }

    #[must_use]
    pub fn id(&self) -> ChapterId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Lessons sorted by their order.
    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }
}

//
// ─── UNLOCK EDGE ───────────────────────────────────────────────────────────────
//

/// Derived relation: completing `from` grants access to `to`.
///
/// Never persisted; recomputed from the hierarchy whenever it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockEdge {
    pub from: LessonId,
    pub to: LessonId,
    pub crosses_chapter: bool,
}

//
// ─── HIERARCHY ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LessonPosition {
    chapter: usize,
    lesson: usize,
    flat: usize,
}

/// Ordered chapters of ordered lessons.
///
/// Structure is fixed once built; only progress annotations (kept elsewhere)
/// change during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseHierarchy {
    id: CourseId,
    chapters: Vec<Chapter>,
    reading_order: Vec<LessonId>,
    positions: HashMap<LessonId, LessonPosition>,
}

impl CourseHierarchy {
    /// Build a hierarchy, sorting chapters and lessons by their `order`.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyError` when the course or a chapter is empty, when an
    /// order or id is duplicated, or when a quiz-gated lesson has no quiz.
    pub fn new(id: CourseId, mut chapters: Vec<Chapter>) -> Result<Self, HierarchyError> {
        if chapters.is_empty() {
            return Err(HierarchyError::EmptyCourse);
        }

        chapters.sort_by_key(Chapter::order);

        let mut chapter_orders = HashSet::new();
        let mut chapter_ids = HashSet::new();
        let mut reading_order = Vec::new();
        let mut positions = HashMap::new();

        for (chapter_idx, chapter) in chapters.iter_mut().enumerate() {
            if !chapter_orders.insert(chapter.order) {
                return Err(HierarchyError::DuplicateChapterOrder(chapter.order));
            }
            if !chapter_ids.insert(chapter.id) {
                return Err(HierarchyError::DuplicateChapter(chapter.id));
            }
            if chapter.lessons.is_empty() {
                return Err(HierarchyError::EmptyChapter(chapter.id));
            }

            chapter.lessons.sort_by_key(Lesson::order);

            let mut lesson_orders = HashSet::new();
            for (lesson_idx, lesson) in chapter.lessons.iter().enumerate() {
                if !lesson_orders.insert(lesson.order) {
                    return Err(HierarchyError::DuplicateLessonOrder {
                        chapter: chapter.id,
                        order: lesson.order,
                    });
                }
                if lesson.quiz_required && lesson.quiz.is_none() {
                    return Err(HierarchyError::MissingQuiz(lesson.id));
                }
                let position = LessonPosition {
                    chapter: chapter_idx,
                    lesson: lesson_idx,
                    flat: reading_order.len(),
                };
                if positions.insert(lesson.id, position).is_some() {
                    return Err(HierarchyError::DuplicateLesson(lesson.id));
                }
                reading_order.push(lesson.id);
            }
        }

        Ok(Self {
            id,
            chapters,
            reading_order,
            positions,
        })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// Every lesson id, chapter by chapter, in reading order.
    #[must_use]
    pub fn reading_order(&self) -> &[LessonId] {
        &self.reading_order
    }

    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.reading_order.len()
    }

    #[must_use]
    pub fn contains(&self, lesson: LessonId) -> bool {
        self.positions.contains_key(&lesson)
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&Lesson> {
        let pos = self.positions.get(&id)?;
        Some(&self.chapters[pos.chapter].lessons[pos.lesson])
    }

    #[must_use]
    pub fn chapter_of(&self, id: LessonId) -> Option<&Chapter> {
        let pos = self.positions.get(&id)?;
        Some(&self.chapters[pos.chapter])
    }

    /// Lesson 1 of chapter 1; always unlocked.
    #[must_use]
    pub fn first_lesson(&self) -> LessonId {
        // Construction guarantees at least one lesson.
        self.reading_order[0]
    }

    #[must_use]
    pub fn is_first_lesson(&self, id: LessonId) -> bool {
        self.reading_order.first() == Some(&id)
    }

    /// Next lesson in reading order, wrapping into the next chapter.
    #[must_use]
    pub fn successor(&self, id: LessonId) -> Option<LessonId> {
        let pos = self.positions.get(&id)?;
        self.reading_order.get(pos.flat + 1).copied()
    }

    #[must_use]
    pub fn predecessor(&self, id: LessonId) -> Option<LessonId> {
        let pos = self.positions.get(&id)?;
        pos.flat
            .checked_sub(1)
            .and_then(|prev| self.reading_order.get(prev).copied())
    }

    /// The edge along which completing `id` propagates, if any.
    #[must_use]
    pub fn unlock_edge(&self, id: LessonId) -> Option<UnlockEdge> {
        let from = self.positions.get(&id)?;
        let to = self.successor(id)?;
        let to_pos = self.positions.get(&to)?;
        Some(UnlockEdge {
            from: id,
            to,
            crosses_chapter: from.chapter != to_pos.chapter,
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: u64, order: u32) -> Lesson {
        Lesson::new(LessonId::new(id), format!("Lesson {id}"), order)
    }

    fn two_chapter_course() -> CourseHierarchy {
        CourseHierarchy::new(
            CourseId::new(1),
            vec![
                // Deliberately out of order; construction sorts.
                Chapter::new(ChapterId::new(20), "Second", 2, vec![lesson(21, 1), lesson(22, 2)]),
                Chapter::new(ChapterId::new(10), "First", 1, vec![lesson(12, 2), lesson(11, 1)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reading_order_follows_chapter_then_lesson_order() {
        let course = two_chapter_course();
        let ids: Vec<u64> = course.reading_order().iter().map(LessonId::value).collect();
        assert_eq!(ids, vec![11, 12, 21, 22]);
        assert_eq!(course.first_lesson(), LessonId::new(11));
        assert_eq!(course.lesson_count(), 4);
    }

    #[test]
    fn successor_wraps_into_next_chapter() {
        let course = two_chapter_course();
        assert_eq!(course.successor(LessonId::new(11)), Some(LessonId::new(12)));
        assert_eq!(course.successor(LessonId::new(12)), Some(LessonId::new(21)));
        assert_eq!(course.successor(LessonId::new(22)), None);
        assert_eq!(course.predecessor(LessonId::new(21)), Some(LessonId::new(12)));
        assert_eq!(course.predecessor(LessonId::new(11)), None);

        let edge = course.unlock_edge(LessonId::new(12)).unwrap();
        assert_eq!(edge.to, LessonId::new(21));
        assert!(edge.crosses_chapter);
        assert!(!course.unlock_edge(LessonId::new(11)).unwrap().crosses_chapter);
    }

    #[test]
    fn unknown_lesson_has_no_neighbours() {
        let course = two_chapter_course();
        assert_eq!(course.successor(LessonId::new(99)), None);
        assert!(course.lesson(LessonId::new(99)).is_none());
        assert!(!course.contains(LessonId::new(99)));
    }

    #[test]
    fn rejects_duplicate_lesson_order() {
        let err = CourseHierarchy::new(
            CourseId::new(1),
            vec![Chapter::new(ChapterId::new(1), "C", 1, vec![lesson(1, 1), lesson(2, 1)])],
        )
        .unwrap_err();
        assert_eq!(
            err,
            HierarchyError::DuplicateLessonOrder {
                chapter: ChapterId::new(1),
                order: 1
            }
        );
    }

    #[test]
    fn rejects_duplicate_chapter_order_and_empty_shapes() {
        let err = CourseHierarchy::new(
            CourseId::new(1),
            vec![
                Chapter::new(ChapterId::new(1), "A", 1, vec![lesson(1, 1)]),
                Chapter::new(ChapterId::new(2), "B", 1, vec![lesson(2, 1)]),
            ],
        )
        .unwrap_err();
        assert_eq!(err, HierarchyError::DuplicateChapterOrder(1));

        assert_eq!(
            CourseHierarchy::new(CourseId::new(1), vec![]).unwrap_err(),
            HierarchyError::EmptyCourse
        );
        assert_eq!(
            CourseHierarchy::new(
                CourseId::new(1),
                vec![Chapter::new(ChapterId::new(5), "Empty", 1, vec![])]
            )
            .unwrap_err(),
            HierarchyError::EmptyChapter(ChapterId::new(5))
        );
    }

    #[test]
    fn rejects_lesson_repeated_across_chapters() {
        let err = CourseHierarchy::new(
            CourseId::new(1),
            vec![
                Chapter::new(ChapterId::new(1), "A", 1, vec![lesson(7, 1)]),
                Chapter::new(ChapterId::new(2), "B", 2, vec![lesson(7, 1)]),
            ],
        )
        .unwrap_err();
        assert_eq!(err, HierarchyError::DuplicateLesson(LessonId::new(7)));
    }

    #[test]
    fn quiz_gated_lesson_needs_a_quiz() {
        let err = CourseHierarchy::new(
            CourseId::new(1),
            vec![Chapter::new(
                ChapterId::new(1),
                "A",
                1,
                vec![lesson(1, 1).requiring_quiz()],
            )],
        )
        .unwrap_err();
        assert_eq!(err, HierarchyError::MissingQuiz(LessonId::new(1)));

        let ok = CourseHierarchy::new(
            CourseId::new(1),
            vec![Chapter::new(
                ChapterId::new(1),
                "A",
                1,
                vec![lesson(1, 1).with_quiz(QuizId::new(3), true)],
            )],
        )
        .unwrap();
        assert!(ok.lesson(LessonId::new(1)).unwrap().quiz_required());
    }
}
