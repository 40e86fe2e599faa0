//! Monotonic per-lesson watch percentage with edge-triggered threshold detection.

use std::collections::BTreeMap;

use crate::model::{LessonId, Percentage};

/// Where a server-provided percentage comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Page (re)initialization: the server value replaces local state outright.
    FreshLoad,
    /// Response to a request made during this session: merged with `max`.
    InSession,
}

/// Result of feeding a value into a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub applied: Percentage,
    /// True only for the single observation that first lifts the value to the
    /// completion threshold during this session.
    pub crossed_threshold: bool,
}

/// Highest observed watch percentage for one lesson.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressCell {
    best: Percentage,
    threshold_fired: bool,
}

impl ProgressCell {
    /// A cell seeded from an authoritative value.
    ///
    /// A lesson already at or past the threshold can no longer cross it.
    #[must_use]
    pub fn seeded(value: Percentage) -> Self {
        Self {
            best: value,
            threshold_fired: value.reaches_threshold(),
        }
    }

    #[must_use]
    pub fn value(&self) -> Percentage {
        self.best
    }

    #[must_use]
    pub fn threshold_fired(&self) -> bool {
        self.threshold_fired
    }

    /// Merge a raw player tick. Out-of-range ticks are clamped and non-finite
    /// ones ignored; the stored value never goes down.
    pub fn observe(&mut self, raw: f64) -> Observation {
        match Percentage::clamped(raw) {
            Some(value) => self.raise(value),
            None => {
                log::debug!("ignoring non-finite progress tick {raw}");
                self.unchanged()
            }
        }
    }

    /// Merge a server-provided value.
    pub fn reconcile(&mut self, server: Percentage, freshness: Freshness) -> Observation {
        match freshness {
            Freshness::FreshLoad => {
                *self = Self::seeded(server);
                self.unchanged()
            }
            Freshness::InSession => self.raise(server),
        }
    }

    fn raise(&mut self, value: Percentage) -> Observation {
        self.best = self.best.max(value);
        let crossed = !self.threshold_fired && self.best.reaches_threshold();
        if crossed {
            self.threshold_fired = true;
        }
        Observation {
            applied: self.best,
            crossed_threshold: crossed,
        }
    }

    fn unchanged(&self) -> Observation {
        Observation {
            applied: self.best,
            crossed_threshold: false,
        }
    }
}

/// One `ProgressCell` per lesson.
#[derive(Debug, Clone, Default)]
pub struct ProgressCells {
    cells: BTreeMap<LessonId, ProgressCell>,
}

impl ProgressCells {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `applied = max(existing, raw)`; unknown lessons start from zero.
    pub fn observe(&mut self, lesson: LessonId, raw: f64) -> Observation {
        self.cells.entry(lesson).or_default().observe(raw)
    }

    pub fn reconcile(
        &mut self,
        lesson: LessonId,
        server: Percentage,
        freshness: Freshness,
    ) -> Observation {
        self.cells
            .entry(lesson)
            .or_default()
            .reconcile(server, freshness)
    }

    #[must_use]
    pub fn get(&self, lesson: LessonId) -> Percentage {
        self.cells
            .get(&lesson)
            .map_or(Percentage::ZERO, ProgressCell::value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(v: f64) -> Percentage {
        Percentage::new(v).unwrap()
    }

    #[test]
    fn applied_value_is_max_regardless_of_order() {
        let pairs = [(10.0, 60.0), (60.0, 10.0), (33.0, 33.0), (0.0, 100.0), (99.0, 2.0)];
        for (p1, p2) in pairs {
            let mut forward = ProgressCell::default();
            forward.observe(p1);
            let a = forward.observe(p2).applied;

            let mut backward = ProgressCell::default();
            backward.observe(p2);
            let b = backward.observe(p1).applied;

            assert_eq!(a.value(), f64::max(p1, p2));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn threshold_fires_once_from_below() {
        let mut cell = ProgressCell::default();
        assert!(!cell.observe(40.0).crossed_threshold);
        assert!(cell.observe(97.0).crossed_threshold);
        assert!(!cell.observe(98.0).crossed_threshold);
        assert!(!cell.observe(100.0).crossed_threshold);
        assert!(!cell.observe(60.0).crossed_threshold);
        assert_eq!(cell.value(), pct(100.0));
    }

    #[test]
    fn seeded_above_threshold_never_fires() {
        let mut cell = ProgressCell::seeded(pct(97.0));
        assert!(cell.threshold_fired());
        assert!(!cell.observe(100.0).crossed_threshold);
    }

    #[test]
    fn fresh_load_may_lower_but_in_session_may_not() {
        let mut cell = ProgressCell::default();
        cell.observe(90.0);

        let in_session = cell.reconcile(pct(50.0), Freshness::InSession);
        assert_eq!(in_session.applied, pct(90.0));

        let fresh = cell.reconcile(pct(50.0), Freshness::FreshLoad);
        assert_eq!(fresh.applied, pct(50.0));
        assert!(!fresh.crossed_threshold);
    }

    #[test]
    fn in_session_server_value_can_cross_threshold() {
        let mut cell = ProgressCell::seeded(pct(80.0));
        let obs = cell.reconcile(pct(96.0), Freshness::InSession);
        assert!(obs.crossed_threshold);
        assert!(!cell.observe(99.0).crossed_threshold);
    }

    #[test]
    fn garbage_ticks_are_clamped_or_ignored() {
        let mut cells = ProgressCells::new();
        let lesson = LessonId::new(1);
        assert_eq!(cells.observe(lesson, -20.0).applied, Percentage::ZERO);
        assert_eq!(cells.observe(lesson, f64::NAN).applied, Percentage::ZERO);
        let obs = cells.observe(lesson, 250.0);
        assert_eq!(obs.applied, Percentage::FULL);
        assert!(obs.crossed_threshold);
        assert_eq!(cells.get(lesson), Percentage::FULL);
        assert_eq!(cells.get(LessonId::new(2)), Percentage::ZERO);
    }
}
