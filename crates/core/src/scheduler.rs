use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// How a new trigger treats the deadline of a write already waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesce {
    /// Keep the earlier deadline: a steady stream of triggers still produces a
    /// write every `delay` (interval autosave).
    KeepDeadline,
    /// Push the deadline out to `now + delay` on every trigger (debounce).
    Restart,
}

/// Delay and coalescing rule attached to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub delay: Duration,
    pub coalesce: Coalesce,
}

impl WritePolicy {
    /// Due at the next flush, collapsing with anything already waiting.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            delay: Duration::zero(),
            coalesce: Coalesce::KeepDeadline,
        }
    }

    #[must_use]
    pub fn interval(delay: Duration) -> Self {
        Self {
            delay,
            coalesce: Coalesce::KeepDeadline,
        }
    }

    #[must_use]
    pub fn debounce(delay: Duration) -> Self {
        Self {
            delay,
            coalesce: Coalesce::Restart,
        }
    }
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Identifies one dispatched write so its completion can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteTicket(u64);

impl WriteTicket {
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No write was waiting for this key.
    Queued,
    /// An existing pending write now carries the newer payload.
    Coalesced,
}

/// A write handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedWrite<K, P> {
    pub key: K,
    pub payload: P,
    pub ticket: WriteTicket,
    /// How many triggers were folded into this payload.
    pub triggers: u32,
}

#[derive(Debug, Clone)]
struct Pending<P> {
    payload: P,
    due_at: DateTime<Utc>,
    triggers: u32,
}

/// Coalescing write scheduler keyed by `K`.
///
/// Holds at most one pending payload and at most one in-flight write per key.
/// A trigger that arrives while a write is in flight only updates the payload
/// of the next write. The scheduler never retries on its own; it has no notion
/// of failure beyond releasing the key.
///
/// Time is always passed in, so tests drive it with a virtual clock.
///
/// # Examples
///
/// ```
/// # use chrono::Duration;
/// # use course_core::scheduler::{WritePolicy, WriteScheduler};
/// # use course_core::time::fixed_now;
/// let mut scheduler = WriteScheduler::new();
/// let policy = WritePolicy::interval(Duration::seconds(10));
/// let t0 = fixed_now();
///
/// scheduler.schedule("lesson-1", 40, policy, t0);
/// scheduler.schedule("lesson-1", 55, policy, t0 + Duration::seconds(3));
/// assert!(scheduler.take_due(t0 + Duration::seconds(9)).is_empty());
///
/// let due = scheduler.take_due(t0 + Duration::seconds(10));
/// assert_eq!(due.len(), 1);
/// assert_eq!(due[0].payload, 55);
/// ```
#[derive(Debug, Clone)]
pub struct WriteScheduler<K, P> {
    pending: BTreeMap<K, Pending<P>>,
    in_flight: BTreeMap<K, WriteTicket>,
    next_ticket: u64,
}

impl<K, P> Default for WriteScheduler<K, P> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            next_ticket: 0,
        }
    }
}

impl<K, P> WriteScheduler<K, P>
where
    K: Ord + Clone + std::fmt::Debug,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload` as the next write for `key`.
    pub fn schedule(
        &mut self,
        key: K,
        payload: P,
        policy: WritePolicy,
        now: DateTime<Utc>,
    ) -> ScheduleOutcome {
        let candidate = now + policy.delay;
        match self.pending.get_mut(&key) {
            Some(pending) => {
                pending.payload = payload;
                pending.triggers = pending.triggers.saturating_add(1);
                pending.due_at = match policy.coalesce {
                    Coalesce::KeepDeadline => pending.due_at.min(candidate),
                    Coalesce::Restart => candidate,
                };
                log::debug!("coalesced write for {key:?}, due {}", pending.due_at);
                ScheduleOutcome::Coalesced
            }
            None => {
                log::debug!("queued write for {key:?}, due {candidate}");
                self.pending.insert(
                    key,
                    Pending {
                        payload,
                        due_at: candidate,
                        triggers: 1,
                    },
                );
                ScheduleOutcome::Queued
            }
        }
    }

    /// Hand out every pending write that is due and whose key is idle.
    ///
    /// Writes for keys with an outstanding request stay pending.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DispatchedWrite<K, P>> {
        self.take_where(|pending| pending.due_at <= now)
    }

    /// Like `take_due`, ignoring deadlines. Still one in flight per key.
    pub fn take_all(&mut self) -> Vec<DispatchedWrite<K, P>> {
        self.take_where(|_| true)
    }

    fn take_where(&mut self, ready: impl Fn(&Pending<P>) -> bool) -> Vec<DispatchedWrite<K, P>> {
        let keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(key, pending)| !self.in_flight.contains_key(*key) && ready(pending))
            .map(|(key, _)| key.clone())
            .collect();

        let mut dispatched = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };
            self.next_ticket += 1;
            let ticket = WriteTicket(self.next_ticket);
            self.in_flight.insert(key.clone(), ticket);
            dispatched.push(DispatchedWrite {
                key,
                payload: pending.payload,
                ticket,
                triggers: pending.triggers,
            });
        }
        dispatched
    }

    /// Release `key` after its write finished, successfully or not.
    ///
    /// Returns `false` for a stale or unknown ticket, which leaves the key busy.
    pub fn complete(&mut self, key: &K, ticket: WriteTicket) -> bool {
        match self.in_flight.get(key) {
            Some(current) if *current == ticket => {
                self.in_flight.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop the pending write for `key`, returning its payload.
    pub fn cancel(&mut self, key: &K) -> Option<P> {
        self.pending.remove(key).map(|pending| pending.payload)
    }

    #[must_use]
    pub fn pending_payload(&self, key: &K) -> Option<&P> {
        self.pending.get(key).map(|pending| &pending.payload)
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest deadline among pending writes.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|pending| pending.due_at).min()
    }

    /// Keys with a write outstanding.
    #[must_use]
    pub fn in_flight_keys(&self) -> BTreeSet<K> {
        self.in_flight.keys().cloned().collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
