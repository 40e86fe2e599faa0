#![allow(dead_code)]

use std::sync::Arc;

use course_core::model::{
    Chapter, ChapterId, CourseHierarchy, CourseId, Lesson, LessonId, Question, QuestionId,
    QuestionKind, QuizDefinition, QuizId,
};
use course_core::time::fixed_now;
use remote::{InMemoryGateway, Remote};
use services::{Clock, LearningSession, SyncConfig};

pub const COURSE: CourseId = CourseId::new(1);
pub const INTRO: LessonId = LessonId::new(1);
pub const SETUP: LessonId = LessonId::new(2);
pub const DEPLOY: LessonId = LessonId::new(3);
pub const SETUP_QUIZ: QuizId = QuizId::new(20);

/// Two chapters: "Intro", then "Setup" gated by a quiz, then "Deploy".
pub fn course() -> CourseHierarchy {
    CourseHierarchy::new(
        COURSE,
        vec![
            Chapter::new(
                ChapterId::new(1),
                "Getting started",
                1,
                vec![
                    Lesson::new(INTRO, "Intro", 1),
                    Lesson::new(SETUP, "Setup", 2).with_quiz(SETUP_QUIZ, true),
                ],
            ),
            Chapter::new(
                ChapterId::new(2),
                "Shipping",
                2,
                vec![Lesson::new(DEPLOY, "Deploy", 1)],
            ),
        ],
    )
    .unwrap()
}

/// Three single-choice questions, answer `1` is always right, 60% to pass.
pub fn setup_quiz() -> QuizDefinition {
    let questions = (1..=3)
        .map(|n| Question {
            id: QuestionId::new(n),
            kind: QuestionKind::SingleChoice,
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_answer_index: 1,
        })
        .collect();
    QuizDefinition::new(SETUP_QUIZ, SETUP, questions, 60.0, None).unwrap()
}

pub fn gateway() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.insert_course(course(), Vec::new());
    gateway.insert_quiz(setup_quiz());
    gateway
}

pub async fn session(gateway: &InMemoryGateway) -> LearningSession {
    LearningSession::load(
        Remote::from_gateway(gateway.clone()),
        COURSE,
        SyncConfig::default(),
        Clock::fixed(fixed_now()),
    )
    .await
    .unwrap()
}

pub fn quiz() -> Arc<QuizDefinition> {
    Arc::new(setup_quiz())
}
