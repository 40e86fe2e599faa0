//! Scripted learner sessions replayed against the in-memory server.
//!
//! A scenario carries the course as the backend would serve it, the quizzes
//! the server grades against, and an ordered list of player and learner
//! events. Time only moves on `advance` steps, so every replay is repeatable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use course_core::model::{
    LessonId, Question, QuestionId, QuestionKind, QuizDefinition, QuizError, QuizId,
};
use course_core::reconcile::ServerSnapshot;
use course_core::time::fixed_now;
use remote::dto::v1::LearningResponse;
use remote::{InMemoryGateway, Remote, RemoteError};
use serde::{Deserialize, Serialize};
use services::{Clock, LearningSession, LoadError, QuizSession, Sidebar, SyncConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub learning: LearningResponse,
    #[serde(default)]
    pub quizzes: Vec<QuizSpec>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuizSpec {
    pub id: u64,
    pub lesson_id: u64,
    pub pass_percentage: f64,
    #[serde(default)]
    pub time_limit_secs: Option<i64>,
    pub questions: Vec<QuestionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionSpec {
    pub id: u64,
    #[serde(default)]
    pub kind: QuestionKindSpec,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKindSpec {
    #[default]
    SingleChoice,
    TrueFalse,
}

/// One scripted step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Event {
    StartLesson {
        lesson: u64,
    },
    LeaveLesson,
    Progress {
        percentage: f64,
        /// Defaults to `percentage`.
        #[serde(default)]
        actual_percentage: Option<f64>,
    },
    Pause {
        percentage: f64,
        position: f64,
    },
    Complete,
    TimeUpdate {
        seconds: f64,
    },
    /// Move virtual time forward, then send whatever became due.
    Advance {
        ms: i64,
    },
    /// Answer and submit a quiz in one go; `-1` leaves a question blank.
    TakeQuiz {
        quiz: u64,
        answers: Vec<i32>,
        #[serde(default)]
        preview: bool,
    },
    FailNextWrites {
        count: usize,
    },
    Refresh,
    Reload,
    Flush,
    /// Wait until no write is in flight or due.
    Settle,
}

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug)]
pub enum ScenarioError {
    Parse(serde_json::Error),
    Course(RemoteError),
    Quiz { quiz: u64, source: QuizError },
    Load(LoadError),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Parse(e) => write!(f, "invalid scenario: {e}"),
            ScenarioError::Course(e) => write!(f, "invalid course in scenario: {e}"),
            ScenarioError::Quiz { quiz, source } => write!(f, "invalid quiz {quiz}: {source}"),
            ScenarioError::Load(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Parse(e) => Some(e),
            ScenarioError::Course(e) => Some(e),
            ScenarioError::Quiz { source, .. } => Some(source),
            ScenarioError::Load(e) => Some(e),
        }
    }
}

//
// ─── REPORT ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub sidebar: Sidebar,
    pub writes_sent: usize,
    pub writes_failed: u64,
    pub quizzes: Vec<QuizReport>,
    /// Steps the session refused, e.g. opening a locked lesson.
    pub rejected: Vec<RejectedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizReport {
    pub quiz_id: QuizId,
    pub lesson_id: LessonId,
    pub passed: bool,
    pub score: f64,
    pub preview: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedStep {
    pub step: usize,
    pub message: String,
}

//
// ─── REPLAY ────────────────────────────────────────────────────────────────────
//

impl Scenario {
    /// # Errors
    ///
    /// Returns `ScenarioError::Parse` for malformed JSON or unknown fields.
    pub fn from_json(raw: &str) -> Result<Self, ScenarioError> {
        serde_json::from_str(raw).map_err(ScenarioError::Parse)
    }
}

impl QuizSpec {
    fn build(&self) -> Result<QuizDefinition, ScenarioError> {
        let questions = self
            .questions
            .iter()
            .map(|q| Question {
                id: QuestionId::new(q.id),
                kind: match q.kind {
                    QuestionKindSpec::SingleChoice => QuestionKind::SingleChoice,
                    QuestionKindSpec::TrueFalse => QuestionKind::TrueFalse,
                },
                options: q.options.clone(),
                correct_answer_index: q.correct_answer_index,
            })
            .collect();
        QuizDefinition::new(
            QuizId::new(self.id),
            LessonId::new(self.lesson_id),
            questions,
            self.pass_percentage,
            self.time_limit_secs.map(Duration::seconds),
        )
        .map_err(|source| ScenarioError::Quiz {
            quiz: self.id,
            source,
        })
    }
}

struct Replay {
    gateway: InMemoryGateway,
    session: LearningSession,
    config: SyncConfig,
    quizzes: HashMap<QuizId, Arc<QuizDefinition>>,
    report: Vec<QuizReport>,
}

/// Run `scenario` on virtual time and report where the learner ended up.
///
/// Refused steps are recorded in the report and the replay carries on. Any
/// write still waiting at the end is sent before the sidebar is taken.
///
/// # Errors
///
/// Returns `ScenarioError` if the course or a quiz is invalid, or if the
/// initial load fails.
pub async fn replay(scenario: Scenario, config: SyncConfig) -> Result<ReplayReport, ScenarioError> {
    let gateway = InMemoryGateway::new();
    let snapshot = ServerSnapshot::try_from(scenario.learning).map_err(ScenarioError::Course)?;
    let course = snapshot.hierarchy.id();
    gateway.insert_course(snapshot.hierarchy, snapshot.progress);

    let mut quizzes = HashMap::new();
    for spec in &scenario.quizzes {
        let definition = spec.build()?;
        gateway.insert_quiz(definition.clone());
        quizzes.insert(definition.id(), Arc::new(definition));
    }

    let session = LearningSession::load(
        Remote::from_gateway(gateway.clone()),
        course,
        config.clone(),
        Clock::fixed(fixed_now()),
    )
    .await
    .map_err(ScenarioError::Load)?;

    let mut replay = Replay {
        gateway,
        session,
        config,
        quizzes,
        report: Vec::new(),
    };

    let mut rejected = Vec::new();
    for (step, event) in scenario.events.into_iter().enumerate() {
        if let Err(e) = replay.apply(event).await {
            log::warn!("step {step} rejected: {e}");
            rejected.push(RejectedStep {
                step,
                message: e.to_string(),
            });
        }
    }

    replay.session.flush_now();
    replay.session.settle().await;

    Ok(ReplayReport {
        sidebar: replay.session.sidebar(),
        writes_sent: replay.gateway.progress_writes().len(),
        writes_failed: replay.session.autosave_stats().failed,
        quizzes: replay.report,
        rejected,
    })
}

impl Replay {
    async fn apply(&mut self, event: Event) -> Result<(), Box<dyn std::error::Error>> {
        let session = &mut self.session;
        match event {
            Event::StartLesson { lesson } => session.start_lesson(LessonId::new(lesson)).await?,
            Event::LeaveLesson => session.leave_lesson(),
            Event::Progress {
                percentage,
                actual_percentage,
            } => {
                session.on_progress(percentage, actual_percentage.unwrap_or(percentage))?;
            }
            Event::Pause {
                percentage,
                position,
            } => {
                session.on_pause(percentage, position)?;
            }
            Event::Complete => {
                session.on_complete()?;
            }
            Event::TimeUpdate { seconds } => {
                session.on_time_update(seconds)?;
            }
            Event::Advance { ms } => {
                session.clock_mut().advance(Duration::milliseconds(ms));
                session.pump();
            }
            Event::TakeQuiz {
                quiz,
                answers,
                preview,
            } => self.take_quiz(QuizId::new(quiz), &answers, preview).await?,
            Event::FailNextWrites { count } => self.gateway.fail_next_progress_writes(count),
            Event::Refresh => {
                session.refresh().await?;
            }
            Event::Reload => session.reload().await?,
            Event::Flush => {
                session.flush_now();
            }
            Event::Settle => {
                session.settle().await;
            }
        }
        Ok(())
    }

    async fn take_quiz(
        &mut self,
        quiz: QuizId,
        answers: &[i32],
        preview: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let definition = self
            .quizzes
            .get(&quiz)
            .cloned()
            .ok_or_else(|| format!("quiz {quiz} is not part of the scenario"))?;

        let mut attempt = if preview {
            QuizSession::preview(definition, &self.config, self.session.clock())
        } else {
            self.session.quiz_session(definition)
        };
        attempt.start().await;
        for (question, answer) in answers.iter().enumerate() {
            if let Ok(answer) = usize::try_from(*answer) {
                attempt.select_answer(question, answer)?;
            }
        }

        let outcome = attempt.submit().await?;
        self.session.apply_quiz_outcome(&outcome)?;
        self.report.push(QuizReport {
            quiz_id: outcome.quiz_id,
            lesson_id: outcome.lesson_id,
            passed: outcome.passed,
            score: outcome.score,
            preview: outcome.preview,
        });
        Ok(())
    }
}
