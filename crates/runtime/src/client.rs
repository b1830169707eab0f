//! Remote client for the review service
//!
//! Used by submitters to push plans and wait for a decision, and by
//! reviewers to fetch, approve or reject them from the command line.

use futures::StreamExt;
use reqwest::{Body, RequestBuilder, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::types::{
    ArtifactKind, ErrorResponse, LockdownResponse, RejectRequest, Submission, SubmissionId,
    SubmissionStatus, SubmitResponse,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Emergency lockdown active on the review service")]
    LockdownActive,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

/// How a wait for a review decision ended
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Approved(Submission),
    Rejected(Submission),
    /// Still pending when the deadline elapsed
    TimedOut,
    Cancelled,
}

/// HTTP client for the review service
#[derive(Debug, Clone)]
pub struct ReviewClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    reviewer: Option<String>,
}

impl ReviewClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Http(format!("client build failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            token: None,
            reviewer: None,
        })
    }

    /// Attach a reviewer bearer token to review actions
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Name claimed by review actions when the service runs unauthenticated
    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(reviewer) = &self.reviewer {
            request = request.header("x-reviewer", reviewer.as_str());
        }
        request
    }

    /// Stream a plan file to `POST /submit`
    pub async fn submit_plan(
        &self,
        plan: &Path,
        submitter: &str,
    ) -> Result<SubmitResponse, ClientError> {
        let file = tokio::fs::File::open(plan).await?;
        let len = file.metadata().await?.len();

        let response = self
            .http
            .post(self.url("/submit"))
            .query(&[("submitter", submitter)])
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let submitted: SubmitResponse = check(response).await?.json().await?;
        tracing::info!(submission_id = %submitted.id, "Plan submitted for review");
        Ok(submitted)
    }

    pub async fn get_status(&self, id: SubmissionId) -> Result<Submission, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/status/{}", id)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<Submission>, ClientError> {
        let response = self.http.get(self.url("/list-pending")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Stream an artifact into `dest`, returning the bytes written.
    ///
    /// `dest` is only replaced once the whole artifact has arrived.
    pub async fn download(
        &self,
        id: SubmissionId,
        kind: ArtifactKind,
        dest: &Path,
    ) -> Result<u64, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/download/{}/{}", id, kind)))
            .send()
            .await?;
        let response = check(response).await?;

        let partial = crate::attestation::sidecar_path(dest, ".part");
        let written = match write_partial(response, &partial, dest).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        tracing::debug!(submission_id = %id, %kind, bytes = written, "Downloaded artifact");
        Ok(written)
    }

    pub async fn download_plan(&self, id: SubmissionId, dest: &Path) -> Result<u64, ClientError> {
        self.download(id, ArtifactKind::Plan, dest).await
    }

    pub async fn download_signature(
        &self,
        id: SubmissionId,
        dest: &Path,
    ) -> Result<u64, ClientError> {
        self.download(id, ArtifactKind::Signature, dest).await
    }

    /// Upload a detached signature, approving the submission
    pub async fn upload_signature(
        &self,
        id: SubmissionId,
        signature: &Path,
    ) -> Result<Submission, ClientError> {
        let bytes = tokio::fs::read(signature).await?;
        let request = self
            .http
            .post(self.url(&format!("/upload-signature/{}", id)))
            .body(bytes);
        let response = self.authorized(request).send().await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn reject(&self, id: SubmissionId, reason: &str) -> Result<Submission, ClientError> {
        let request = self
            .http
            .post(self.url(&format!("/reject/{}", id)))
            .json(&RejectRequest {
                reason: reason.to_string(),
            });
        let response = self.authorized(request).send().await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn set_lockdown(&self, active: bool) -> Result<bool, ClientError> {
        let mode = if active { "on" } else { "off" };
        let request = self
            .http
            .post(self.url("/lockdown"))
            .query(&[("mode", mode)]);
        let response = self.authorized(request).send().await?;
        let body: LockdownResponse = check(response).await?.json().await?;
        Ok(body.lockdown)
    }

    pub async fn lockdown_status(&self) -> Result<bool, ClientError> {
        let response = self.http.get(self.url("/lockdown")).send().await?;
        let body: LockdownResponse = check(response).await?.json().await?;
        Ok(body.lockdown)
    }

    /// Poll `status` every `poll_interval` until the submission leaves
    /// `pending`, `timeout` elapses, or `cancel` fires.
    ///
    /// Transport errors are retried until the deadline; service errors
    /// (lockdown, unknown id) end the wait.
    pub async fn wait_for_decision(
        &self,
        id: SubmissionId,
        timeout: Duration,
        poll_interval: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<WaitOutcome, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            match self.get_status(id).await {
                Ok(submission) => match submission.status {
                    SubmissionStatus::Approved => return Ok(WaitOutcome::Approved(submission)),
                    SubmissionStatus::Rejected => return Ok(WaitOutcome::Rejected(submission)),
                    SubmissionStatus::Pending => {
                        tracing::debug!(submission_id = %id, "Still pending review")
                    }
                },
                Err(ClientError::Http(reason)) => {
                    tracing::warn!(submission_id = %id, "Status poll failed, retrying: {}", reason)
                }
                Err(e) => return Err(e),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            let nap = poll_interval.min(deadline - now);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

/// Stream `response` into `partial`, then move it over `dest`
async fn write_partial(
    response: Response,
    partial: &Path,
    dest: &Path,
) -> Result<u64, ClientError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(partial, dest).await?;
    Ok(written)
}

/// Map non-success responses onto `ClientError`
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });

    Err(match status {
        StatusCode::SERVICE_UNAVAILABLE => ClientError::LockdownActive,
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
            ClientError::Validation(message)
        }
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        other => ClientError::Server {
            status: other.as_u16(),
            message,
        },
    })
}
