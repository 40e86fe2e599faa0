//! Fire-and-forget background writes driven by the core `WriteScheduler`.
//!
//! Writes run as tasks on the current Tokio runtime. Their results are only
//! folded back when the owner calls `collect_finished` or `settle`, so the
//! owner stays the single writer of its own state.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use course_core::mirror::{ProgressAck, SaveTrigger};
use course_core::model::{LessonId, PendingWrite};
use course_core::scheduler::{
    DispatchedWrite, ScheduleOutcome, WritePolicy, WriteScheduler, WriteTicket,
};
use remote::{ProgressGateway, RemoteError};
use tokio::task::{Id, JoinError, JoinSet};

type Completion<K, R> = (K, WriteTicket, Result<R, RemoteError>);

/// Counters for one write channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub scheduled: u64,
    pub coalesced: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
}

//
// ─── DRIVER ────────────────────────────────────────────────────────────────────
//

/// Runs the writes a `WriteScheduler` hands out and releases keys as they finish.
///
/// Failed writes are logged and dropped; the next trigger for the key carries
/// fresher data anyway.
pub struct WriteDriver<K, P, R> {
    scheduler: WriteScheduler<K, P>,
    tasks: JoinSet<Completion<K, R>>,
    spawned: HashMap<Id, (K, WriteTicket)>,
    stats: WriteStats,
}

impl<K, P, R> Default for WriteDriver<K, P, R>
where
    K: Ord + Clone + Debug + Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P, R> WriteDriver<K, P, R>
where
    K: Ord + Clone + Debug + Send + 'static,
    R: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduler: WriteScheduler::new(),
            tasks: JoinSet::new(),
            spawned: HashMap::new(),
            stats: WriteStats::default(),
        }
    }

    pub fn schedule(
        &mut self,
        key: K,
        payload: P,
        policy: WritePolicy,
        now: DateTime<Utc>,
    ) -> ScheduleOutcome {
        self.stats.scheduled += 1;
        let outcome = self.scheduler.schedule(key, payload, policy, now);
        if outcome == ScheduleOutcome::Coalesced {
            self.stats.coalesced += 1;
        }
        outcome
    }

    /// Spawn every due write through `send`. Returns how many were spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn dispatch_due<F, Fut>(&mut self, now: DateTime<Utc>, send: F) -> usize
    where
        F: Fn(&K, P) -> Fut,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let due = self.scheduler.take_due(now);
        self.spawn_all(due, send)
    }

    /// Spawn every pending write regardless of its deadline.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn dispatch_all<F, Fut>(&mut self, send: F) -> usize
    where
        F: Fn(&K, P) -> Fut,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let all = self.scheduler.take_all();
        self.spawn_all(all, send)
    }

    fn spawn_all<F, Fut>(&mut self, writes: Vec<DispatchedWrite<K, P>>, send: F) -> usize
    where
        F: Fn(&K, P) -> Fut,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let count = writes.len();
        for write in writes {
            log::debug!(
                "dispatching write for {:?} ({} trigger(s) folded)",
                write.key,
                write.triggers
            );
            let request = send(&write.key, write.payload);
            let key = write.key.clone();
            let ticket = write.ticket;
            let handle = self
                .tasks
                .spawn(async move { (key, ticket, request.await) });
            self.spawned.insert(handle.id(), (write.key, ticket));
        }
        self.stats.dispatched += count as u64;
        count
    }

    /// Results of writes that already finished, without waiting.
    pub fn collect_finished(&mut self) -> Vec<(K, R)> {
        let mut done = Vec::new();
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.finish(joined, &mut done);
        }
        done
    }

    /// Wait for every outstanding write.
    pub async fn settle(&mut self) -> Vec<(K, R)> {
        let mut done = Vec::new();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.finish(joined, &mut done);
        }
        done
    }

    fn finish(
        &mut self,
        joined: Result<(Id, Completion<K, R>), JoinError>,
        done: &mut Vec<(K, R)>,
    ) {
        match joined {
            Ok((id, (key, ticket, result))) => {
                self.spawned.remove(&id);
                self.scheduler.complete(&key, ticket);
                match result {
                    Ok(response) => {
                        self.stats.succeeded += 1;
                        done.push((key, response));
                    }
                    Err(e) => {
                        self.stats.failed += 1;
                        log::warn!("background write for {key:?} failed: {e}");
                    }
                }
            }
            Err(e) => {
                self.stats.failed += 1;
                if let Some((key, ticket)) = self.spawned.remove(&e.id()) {
                    self.scheduler.complete(&key, ticket);
                    log::warn!("background write task for {key:?} died: {e}");
                } else {
                    log::warn!("background write task died: {e}");
                }
            }
        }
    }

    pub fn cancel(&mut self, key: &K) -> Option<P> {
        self.scheduler.cancel(key)
    }

    #[must_use]
    pub fn pending_payload(&self, key: &K) -> Option<&P> {
        self.scheduler.pending_payload(key)
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.scheduler.is_in_flight(key)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.scheduler.in_flight_count()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_due()
    }

    #[must_use]
    pub fn stats(&self) -> WriteStats {
        self.stats
    }
}

//
// ─── LESSON AUTOSAVE ───────────────────────────────────────────────────────────
//

/// Lesson progress autosave: interval writes while playing, immediate writes
/// on pause and on threshold crossing, one request per lesson at a time.
pub struct AutosaveService {
    gateway: Arc<dyn ProgressGateway>,
    interval: Duration,
    writes: WriteDriver<LessonId, PendingWrite, ProgressAck>,
}

impl AutosaveService {
    #[must_use]
    pub fn new(gateway: Arc<dyn ProgressGateway>, interval: Duration) -> Self {
        Self {
            gateway,
            interval,
            writes: WriteDriver::new(),
        }
    }

    #[must_use]
    pub fn policy_for(&self, trigger: SaveTrigger) -> WritePolicy {
        match trigger {
            SaveTrigger::Interval => WritePolicy::interval(self.interval),
            SaveTrigger::Pause | SaveTrigger::ThresholdCrossed => WritePolicy::immediate(),
        }
    }

    /// Replace the lesson's next write with `write`.
    pub fn schedule(
        &mut self,
        write: PendingWrite,
        trigger: SaveTrigger,
        now: DateTime<Utc>,
    ) -> ScheduleOutcome {
        let policy = self.policy_for(trigger);
        self.writes.schedule(write.lesson_id, write, policy, now)
    }

    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn dispatch_due(&mut self, now: DateTime<Utc>) -> usize {
        let gateway = Arc::clone(&self.gateway);
        self.writes.dispatch_due(now, move |_, write| {
            let gateway = Arc::clone(&gateway);
            async move { gateway.save_lesson_progress(&write).await }
        })
    }

    /// Send every pending write now, still one request per lesson.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn flush_now(&mut self) -> usize {
        let gateway = Arc::clone(&self.gateway);
        self.writes.dispatch_all(move |_, write| {
            let gateway = Arc::clone(&gateway);
            async move { gateway.save_lesson_progress(&write).await }
        })
    }

    pub fn collect_finished(&mut self) -> Vec<ProgressAck> {
        acks(self.writes.collect_finished())
    }

    pub async fn settle(&mut self) -> Vec<ProgressAck> {
        acks(self.writes.settle().await)
    }

    #[must_use]
    pub fn pending_write(&self, lesson: LessonId) -> Option<&PendingWrite> {
        self.writes.pending_payload(&lesson)
    }

    #[must_use]
    pub fn is_in_flight(&self, lesson: LessonId) -> bool {
        self.writes.is_in_flight(&lesson)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.writes.in_flight_count()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.writes.pending_count()
    }

    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.writes.next_due()
    }

    #[must_use]
    pub fn stats(&self) -> WriteStats {
        self.writes.stats()
    }
}

fn acks(done: Vec<(LessonId, ProgressAck)>) -> Vec<ProgressAck> {
    done.into_iter().map(|(_, ack)| ack).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::Percentage;
    use course_core::time::fixed_now;
    use remote::InMemoryGateway;

    fn write(lesson: u64, pct: f64) -> PendingWrite {
        PendingWrite {
            lesson_id: LessonId::new(lesson),
            watch_percentage: Percentage::new(pct).unwrap(),
            current_position: 0.0,
            total_watch_time: 0.0,
        }
    }

    #[tokio::test]
    async fn interval_writes_wait_for_their_deadline() {
        let gateway = InMemoryGateway::new();
        let mut autosave = AutosaveService::new(Arc::new(gateway.clone()), Duration::seconds(10));
        let t0 = fixed_now();

        autosave.schedule(write(1, 10.0), SaveTrigger::Interval, t0);
        assert_eq!(autosave.dispatch_due(t0 + Duration::seconds(9)), 0);
        assert_eq!(autosave.dispatch_due(t0 + Duration::seconds(10)), 1);
        assert!(autosave.is_in_flight(LessonId::new(1)));

        // The course is unknown to the gateway, so the write fails and is dropped.
        assert!(autosave.settle().await.is_empty());
        assert!(!autosave.is_in_flight(LessonId::new(1)));
        assert_eq!(autosave.stats().failed, 1);
        assert_eq!(autosave.pending_count(), 0);
    }

    #[tokio::test]
    async fn pause_is_due_at_once() {
        let gateway = InMemoryGateway::new();
        let mut autosave = AutosaveService::new(Arc::new(gateway.clone()), Duration::seconds(10));
        let t0 = fixed_now();

        autosave.schedule(write(1, 10.0), SaveTrigger::Interval, t0);
        autosave.schedule(write(1, 12.0), SaveTrigger::Pause, t0);
        assert_eq!(autosave.dispatch_due(t0), 1);
        autosave.settle().await;

        assert_eq!(gateway.progress_writes(), vec![write(1, 12.0)]);
        assert_eq!(autosave.stats().coalesced, 1);
    }
}
