mod common;

use common::{COURSE, DEPLOY, INTRO, SETUP};
use course_core::model::{LessonId, LessonProgress, Percentage};
use course_core::time::fixed_now;
use remote::{Remote, RemoteCall};
use services::{Clock, LearningSession, LoadError, NavigationError, SyncConfig};

#[tokio::test]
async fn locked_lesson_is_refused_without_asking_the_server() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;

    let err = session.start_lesson(DEPLOY).await.unwrap_err();
    assert!(matches!(err, NavigationError::Denied { lesson, .. } if lesson == DEPLOY));
    assert!(!gateway.calls().contains(&RemoteCall::StartLesson(DEPLOY)));
    assert_eq!(session.active_lesson(), None);

    assert!(matches!(
        session.start_lesson(LessonId::new(404)).await,
        Err(NavigationError::UnknownLesson(_))
    ));
}

#[tokio::test]
async fn freshly_unlocked_lesson_opens_before_its_write_settles() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    session.on_progress(97.0, 97.0).unwrap();
    assert!(session.mirror().lesson(SETUP).unwrap().is_unlocked);
    assert!(session.autosave().is_in_flight(INTRO));

    session.start_lesson(SETUP).await.unwrap();
    assert_eq!(session.active_lesson(), Some(SETUP));
    assert!(gateway.lesson_progress(INTRO).unwrap().is_completed);
    assert!(gateway.lesson_progress(SETUP).unwrap().is_unlocked);
    assert!(!session.mirror().is_unsynced(INTRO));

    let calls = gateway.calls();
    let write = calls
        .iter()
        .position(|c| matches!(c, RemoteCall::SaveLessonProgress(w) if w.lesson_id == INTRO));
    let start = calls
        .iter()
        .position(|c| *c == RemoteCall::StartLesson(SETUP));
    assert!(write.unwrap() < start.unwrap());
}

#[tokio::test]
async fn server_refusal_carries_its_message() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    // Unlocked locally, but the write announcing it never reaches the server.
    gateway.fail_next_progress_writes(1);
    session.on_progress(99.0, 99.0).unwrap();
    let err = session.start_lesson(SETUP).await.unwrap_err();
    match err {
        NavigationError::Denied { lesson, message } => {
            assert_eq!(lesson, SETUP);
            assert!(message.contains("previous lesson"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(gateway.calls().contains(&RemoteCall::StartLesson(SETUP)));
    assert_eq!(session.active_lesson(), Some(INTRO));

    // The next write carries the same progress and the server catches up.
    session.on_pause(99.0, 300.0).unwrap();
    session.start_lesson(SETUP).await.unwrap();
    assert_eq!(session.active_lesson(), Some(SETUP));
}

#[tokio::test]
async fn load_failure_is_retryable() {
    let gateway = common::gateway();
    gateway.fail_next_loads(1);
    let remote = Remote::from_gateway(gateway.clone());
    let clock = Clock::fixed(fixed_now());

    let err = LearningSession::load(remote.clone(), COURSE, SyncConfig::default(), clock)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LoadError::Remote { course, .. } if course == COURSE));

    let session = LearningSession::load(remote.clone(), COURSE, SyncConfig::default(), clock)
        .await
        .unwrap();
    assert_eq!(session.course_id(), COURSE);

    gateway.fail_next_loads(2);
    let config = SyncConfig::default().with_load_attempts(3);
    assert!(LearningSession::load(remote, COURSE, config, clock).await.is_ok());
}

#[tokio::test]
async fn reload_takes_server_values_and_refresh_never_regresses() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();
    session.on_progress(80.0, 80.0).unwrap();

    // Another device reports less progress for the same learner.
    gateway.insert_course(
        common::course(),
        vec![(
            INTRO,
            LessonProgress {
                watch_percentage: Percentage::new(20.0).unwrap(),
                is_unlocked: true,
                ..LessonProgress::default()
            },
        )],
    );

    session.refresh().await.unwrap();
    assert_eq!(
        session.mirror().lesson(INTRO).unwrap().watch_percentage.value(),
        80.0
    );

    session.reload().await.unwrap();
    assert_eq!(
        session.mirror().lesson(INTRO).unwrap().watch_percentage.value(),
        20.0
    );
    assert_eq!(session.active_lesson(), Some(INTRO));
}
