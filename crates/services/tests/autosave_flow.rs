mod common;

use chrono::Duration;
use common::{DEPLOY, INTRO, SETUP};
use course_core::mirror::Effect;
use course_core::model::LessonStatus;

#[tokio::test]
async fn ticks_inside_one_window_become_one_write() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    session.on_progress(10.0, 10.0).unwrap();
    session.clock_mut().advance(Duration::seconds(3));
    session.on_time_update(1.0).unwrap();
    session.on_progress(20.0, 20.0).unwrap();
    session.clock_mut().advance(Duration::seconds(3));
    session.on_time_update(2.0).unwrap();
    session.on_progress(30.0, 30.0).unwrap();

    session.clock_mut().advance(Duration::seconds(3));
    session.pump();
    assert!(gateway.progress_writes().is_empty());

    session.clock_mut().advance(Duration::seconds(1));
    session.pump();
    session.settle().await;

    let writes = gateway.progress_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].lesson_id, INTRO);
    assert_eq!(writes[0].watch_percentage.value(), 30.0);
    assert_eq!(writes[0].current_position, 2.0);
    assert_eq!(writes[0].total_watch_time, 2.0);
    assert!(!session.mirror().is_unsynced(INTRO));
}

#[tokio::test]
async fn trigger_during_a_write_updates_the_next_one() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    session.on_pause(40.0, 240.0).unwrap();
    assert!(session.autosave().is_in_flight(INTRO));

    session.on_pause(45.0, 270.0).unwrap();
    session.on_pause(50.0, 300.0).unwrap();
    assert_eq!(session.autosave().in_flight_count(), 1);
    assert_eq!(
        session
            .autosave()
            .pending_write(INTRO)
            .unwrap()
            .watch_percentage
            .value(),
        50.0
    );

    session.settle().await;

    let sent: Vec<f64> = gateway
        .progress_writes()
        .iter()
        .map(|w| w.watch_percentage.value())
        .collect();
    assert_eq!(sent, vec![40.0, 50.0]);
    assert_eq!(session.autosave().pending_count(), 0);
}

#[tokio::test]
async fn failed_write_is_not_retried() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();
    gateway.fail_next_progress_writes(1);

    session.on_pause(40.0, 240.0).unwrap();
    session.settle().await;
    assert_eq!(gateway.progress_writes().len(), 1);
    assert_eq!(session.autosave_stats().failed, 1);

    session.clock_mut().advance(Duration::minutes(5));
    session.pump();
    session.settle().await;
    assert_eq!(gateway.progress_writes().len(), 1);
    assert!(session.mirror().is_unsynced(INTRO));

    // The next trigger carries the fresher value.
    session.on_pause(42.0, 252.0).unwrap();
    session.settle().await;
    let writes = gateway.progress_writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].watch_percentage.value(), 42.0);
    assert!(!session.mirror().is_unsynced(INTRO));
}

#[tokio::test]
async fn watching_past_threshold_unlocks_before_the_server_answers() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    session.on_progress(40.0, 40.0).unwrap();
    let effects = session.on_progress(97.0, 90.0).unwrap();
    assert!(effects.contains(&Effect::Completed(INTRO)));
    assert!(effects.contains(&Effect::Unlocked(SETUP)));

    let sidebar = session.sidebar();
    assert!(sidebar.lesson(SETUP).unwrap().is_unlocked);
    assert_eq!(sidebar.lesson(INTRO).unwrap().status, LessonStatus::Completed);
    assert!(sidebar.lesson(INTRO).unwrap().unsynced);
    assert!(!sidebar.lesson(DEPLOY).unwrap().is_unlocked);

    // The threshold write went out without waiting for the interval.
    assert!(session.autosave().is_in_flight(INTRO));

    let rewind = session.on_progress(60.0, 91.0).unwrap();
    assert!(!rewind.iter().any(|e| matches!(e, Effect::Unlocked(_))));
    assert_eq!(
        session.mirror().lesson(INTRO).unwrap().watch_percentage.value(),
        97.0
    );

    session.settle().await;
    assert!(!session.mirror().is_unsynced(INTRO));
    let stored = gateway.lesson_progress(INTRO).unwrap();
    assert!(stored.is_completed);
    assert_eq!(stored.watch_percentage.value(), 97.0);
    assert!(gateway.lesson_progress(SETUP).unwrap().is_unlocked);

    session.start_lesson(SETUP).await.unwrap();
    assert_eq!(session.active_lesson(), Some(SETUP));
}

#[tokio::test]
async fn leaving_a_lesson_does_not_flush() {
    let gateway = common::gateway();
    let mut session = common::session(&gateway).await;
    session.start_lesson(INTRO).await.unwrap();

    session.on_progress(30.0, 30.0).unwrap();
    session.leave_lesson();
    assert!(session.on_progress(35.0, 35.0).is_err());
    session.settle().await;
    assert!(gateway.progress_writes().is_empty());
    assert_eq!(session.autosave().pending_count(), 1);

    // Callers that want the last window can still send it explicitly.
    assert_eq!(session.flush_now(), 1);
    session.settle().await;
    assert_eq!(gateway.progress_writes().len(), 1);
}
