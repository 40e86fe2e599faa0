use std::env;

use chrono::Duration;

const DEFAULT_AUTOSAVE_INTERVAL_MS: i64 = 10_000;
const DEFAULT_ANSWER_DEBOUNCE_MS: i64 = 1_000;
const DEFAULT_NAVIGATION_DEBOUNCE_MS: i64 = 500;

/// Timing knobs for background writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often progress is written while a video plays.
    pub autosave_interval: Duration,
    /// Quiet period after an answer change before the attempt is saved.
    pub answer_debounce: Duration,
    /// Quiet period after moving between questions before the cursor is saved.
    pub navigation_debounce: Duration,
    /// Tries `LearningSession::load` makes before giving up.
    pub load_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::milliseconds(DEFAULT_AUTOSAVE_INTERVAL_MS),
            answer_debounce: Duration::milliseconds(DEFAULT_ANSWER_DEBOUNCE_MS),
            navigation_debounce: Duration::milliseconds(DEFAULT_NAVIGATION_DEBOUNCE_MS),
            load_attempts: 1,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    #[must_use]
    pub fn with_answer_debounce(mut self, debounce: Duration) -> Self {
        self.answer_debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_navigation_debounce(mut self, debounce: Duration) -> Self {
        self.navigation_debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_load_attempts(mut self, attempts: u32) -> Self {
        self.load_attempts = attempts.max(1);
        self
    }

    /// Defaults overridden by `COURSE_SYNC_AUTOSAVE_INTERVAL_MS`,
    /// `COURSE_SYNC_ANSWER_DEBOUNCE_MS`, `COURSE_SYNC_NAVIGATION_DEBOUNCE_MS`
    /// and `COURSE_SYNC_LOAD_ATTEMPTS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`. Unparsable values
    /// are ignored.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            let raw = lookup(key)?;
            match raw.trim().parse::<i64>() {
                Ok(ms) if ms >= 0 => Some(Duration::milliseconds(ms)),
                _ => {
                    log::warn!("ignoring {key}={raw:?}: expected milliseconds");
                    None
                }
            }
        };

        let mut config = Self::default();
        if let Some(interval) = millis("COURSE_SYNC_AUTOSAVE_INTERVAL_MS") {
            config.autosave_interval = interval;
        }
        if let Some(debounce) = millis("COURSE_SYNC_ANSWER_DEBOUNCE_MS") {
            config.answer_debounce = debounce;
        }
        if let Some(debounce) = millis("COURSE_SYNC_NAVIGATION_DEBOUNCE_MS") {
            config.navigation_debounce = debounce;
        }
        if let Some(attempts) = lookup("COURSE_SYNC_LOAD_ATTEMPTS")
            .and_then(|raw| raw.trim().parse::<u32>().ok())
        {
            config = config.with_load_attempts(attempts);
        }
        config
    }
}
