use std::env;
use std::time::Duration;

use async_trait::async_trait;
use course_core::mirror::ProgressAck;
use course_core::model::{CourseId, LessonId, PendingWrite, QuizId};
use course_core::reconcile::ServerSnapshot;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::dto::v1;
use crate::gateway::{
    CourseGateway, ProgressGateway, QuizGateway, QuizSubmission, RemoteError, SavedQuizProgress,
    SubmissionResult,
};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `COURSE_SYNC_API_URL`, `COURSE_SYNC_API_TOKEN` and
    /// `COURSE_SYNC_HTTP_TIMEOUT_SECS`. Returns `None` without a usable URL.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let raw = env::var("COURSE_SYNC_API_URL").ok()?;
        let base_url = match Url::parse(raw.trim()) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("ignoring COURSE_SYNC_API_URL={raw:?}: {e}");
                return None;
            }
        };
        let mut config = Self::new(base_url);
        if let Ok(token) = env::var("COURSE_SYNC_API_TOKEN") {
            if !token.trim().is_empty() {
                config.token = Some(token);
            }
        }
        if let Some(secs) = env::var("COURSE_SYNC_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Some(config)
    }
}

/// Gateway talking to the learning backend over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Returns `RemoteError::Transport` if the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        // `Url::join` replaces the last segment unless the base ends in '/'.
        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: config.token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<v1::ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        log::debug!("server answered {status}: {message}");

        Err(match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound,
            StatusCode::FORBIDDEN | StatusCode::LOCKED => RemoteError::Locked { message },
            _ => RemoteError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[async_trait]
impl CourseGateway for HttpGateway {
    async fn fetch_learning(&self, course: CourseId) -> Result<ServerSnapshot, RemoteError> {
        let url = self.endpoint(&format!("courses/{course}/learning"))?;
        let response = self.send(self.client.get(url)).await?;
        let body: v1::LearningResponse = response.json().await.map_err(transport)?;
        ServerSnapshot::try_from(body)
    }
}

#[async_trait]
impl ProgressGateway for HttpGateway {
    async fn start_lesson(&self, lesson: LessonId) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("progress/lessons/{lesson}/start"))?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn save_lesson_progress(&self, write: &PendingWrite) -> Result<ProgressAck, RemoteError> {
        let url = self.endpoint(&format!("progress/lessons/{}", write.lesson_id))?;
        let payload = v1::ProgressWriteRequest::from(write);
        let response = self.send(self.client.put(url).json(&payload)).await?;
        let body: v1::ProgressAckResponse = response.json().await.map_err(transport)?;
        ProgressAck::try_from(body)
    }
}

#[async_trait]
impl QuizGateway for HttpGateway {
    async fn load_quiz_progress(
        &self,
        quiz: QuizId,
    ) -> Result<Option<SavedQuizProgress>, RemoteError> {
        let url = self.endpoint(&format!("quizzes/{quiz}/progress"))?;
        let response = match self.send(self.client.get(url)).await {
            Ok(response) => response,
            Err(RemoteError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body: v1::QuizProgressBody = response.json().await.map_err(transport)?;
        Ok(Some(body.into()))
    }

    async fn save_quiz_progress(
        &self,
        quiz: QuizId,
        progress: &SavedQuizProgress,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("quizzes/{quiz}/progress"))?;
        let payload = v1::QuizProgressBody::from(progress);
        self.send(self.client.put(url).json(&payload)).await?;
        Ok(())
    }

    async fn clear_quiz_progress(&self, quiz: QuizId) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("quizzes/{quiz}/progress"))?;
        match self.send(self.client.delete(url)).await {
            Ok(_) | Err(RemoteError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn submit_quiz(
        &self,
        quiz: QuizId,
        submission: &QuizSubmission,
    ) -> Result<SubmissionResult, RemoteError> {
        let url = self.endpoint(&format!("quizzes/{quiz}/submit"))?;
        let payload = v1::QuizSubmitRequest::from(submission);
        let response = self.send(self.client.post(url).json(&payload)).await?;
        let body: v1::QuizSubmitResponse = response.json().await.map_err(transport)?;
        Ok(body.into())
    }
}
