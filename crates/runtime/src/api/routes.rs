//! HTTP API route handlers
//!
//! Thin adapters between axum extractors and `ReviewWorkflowService`.

#[cfg(feature = "http-api")]
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};

#[cfg(feature = "http-api")]
use futures::TryStreamExt;

#[cfg(feature = "http-api")]
use tokio_util::io::{ReaderStream, StreamReader};

#[cfg(feature = "http-api")]
use super::types::{AppState, HealthResponse, LockdownParams, SubmitParams};

#[cfg(feature = "http-api")]
use crate::review::ReviewerCredentials;

#[cfg(feature = "http-api")]
use crate::store::{BlobReader, BlobTooLarge};

#[cfg(feature = "http-api")]
use http_body_util::LengthLimitError;

#[cfg(feature = "http-api")]
use crate::types::{
    ArtifactKind, ErrorResponse, LockdownResponse, RejectRequest, ReviewError, Submission,
    SubmitResponse,
};

/// Submitter recorded when the caller names none
#[cfg(feature = "http-api")]
pub const DEFAULT_SUBMITTER: &str = "unknown";

#[cfg(feature = "http-api")]
impl IntoResponse for ReviewError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReviewError::Validation(_) => StatusCode::BAD_REQUEST,
            ReviewError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ReviewError::NotFound(_) => StatusCode::NOT_FOUND,
            ReviewError::InvalidTransition { .. } | ReviewError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            ReviewError::LockdownActive => StatusCode::SERVICE_UNAVAILABLE,
            ReviewError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ReviewError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let details = match &self {
            ReviewError::InvalidTransition { id, status } => Some(serde_json::json!({
                "id": id,
                "status": status,
            })),
            ReviewError::Conflict {
                id,
                expected,
                found,
            } => Some(serde_json::json!({
                "id": id,
                "expected_version": expected,
                "found_version": found,
            })),
            _ => None,
        };

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// Adapt a streaming request body into the store's reader type
#[cfg(feature = "http-api")]
fn body_reader(body: Body) -> BlobReader<'static> {
    let stream = body.into_data_stream().map_err(body_error);
    Box::pin(StreamReader::new(stream))
}

/// Bodies cut off by `RequestBodyLimitLayer` mid-stream surface as `BlobTooLarge`
#[cfg(feature = "http-api")]
fn body_error(err: axum::Error) -> std::io::Error {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return std::io::Error::new(std::io::ErrorKind::InvalidData, BlobTooLarge);
        }
        source = e.source();
    }
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[cfg(feature = "http-api")]
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `Authorization: Bearer <token>` and `X-Reviewer`
#[cfg(feature = "http-api")]
fn credentials(headers: &HeaderMap) -> ReviewerCredentials {
    let token = header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    ReviewerCredentials {
        token,
        claimed_reviewer: header_str(headers, "x-reviewer").map(str::to_string),
    }
}

/// `POST /submit?submitter=<name>` with the raw plan as body
#[cfg(feature = "http-api")]
pub async fn submit_plan(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<SubmitResponse>, ReviewError> {
    let submitter = header_str(&headers, "x-submitter")
        .map(str::to_string)
        .or(params.submitter)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SUBMITTER.to_string());

    let submission = state.service.submit(body_reader(body), &submitter).await?;
    Ok(Json(SubmitResponse {
        id: submission.id,
        status: submission.status,
    }))
}

/// `GET /status/:id`
#[cfg(feature = "http-api")]
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Submission>, ReviewError> {
    Ok(Json(state.service.status(&id).await?))
}

/// `GET /list-pending`
#[cfg(feature = "http-api")]
pub async fn list_pending(
    State(state): State<AppState>,
) -> Result<Json<Vec<Submission>>, ReviewError> {
    Ok(Json(state.service.list_pending().await?))
}

/// `GET /download/:id/:kind`, streamed from disk
#[cfg(feature = "http-api")]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> Result<Response, ReviewError> {
    state.service.ensure_open()?;
    let kind: ArtifactKind = kind.parse()?;
    let artifact = state.service.download(&id, kind).await?;

    let filename = match kind {
        ArtifactKind::Plan => "plan",
        ArtifactKind::Signature => "plan.sig",
    };
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, artifact.len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(artifact.file));
    Ok((headers, body).into_response())
}

/// `POST /upload-signature/:id`: the approval action
#[cfg(feature = "http-api")]
pub async fn upload_signature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Submission>, ReviewError> {
    let creds = credentials(&headers);
    let submission = state
        .service
        .upload_signature(&id, body_reader(body), &creds)
        .await?;
    Ok(Json(submission))
}

/// `POST /reject/:id` with `{"reason": "..."}`
#[cfg(feature = "http-api")]
pub async fn reject_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<Submission>, ReviewError> {
    state.service.ensure_open()?;
    let Json(request) =
        payload.map_err(|e| ReviewError::Validation(format!("invalid reject body: {}", e)))?;
    let creds = credentials(&headers);
    let submission = state.service.reject(&id, &request.reason, &creds).await?;
    Ok(Json(submission))
}

/// `POST /lockdown?mode=on|off`, never gated by the lockdown itself
#[cfg(feature = "http-api")]
pub async fn set_lockdown(
    State(state): State<AppState>,
    Query(params): Query<LockdownParams>,
    headers: HeaderMap,
) -> Result<Json<LockdownResponse>, ReviewError> {
    let active = match params.mode.as_deref() {
        Some("on") => true,
        Some("off") => false,
        Some(other) => {
            return Err(ReviewError::Validation(format!(
                "invalid lockdown mode '{}' (expected 'on' or 'off')",
                other
            )))
        }
        None => {
            return Err(ReviewError::Validation(
                "missing lockdown mode (expected ?mode=on or ?mode=off)".into(),
            ))
        }
    };

    let lockdown = state.service.set_lockdown(active, &credentials(&headers)).await?;
    Ok(Json(LockdownResponse { lockdown }))
}

/// `GET /lockdown`
#[cfg(feature = "http-api")]
pub async fn get_lockdown(State(state): State<AppState>) -> Json<LockdownResponse> {
    Json(LockdownResponse {
        lockdown: state.service.lockdown_active(),
    })
}

/// `GET /health`
#[cfg(feature = "http-api")]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        lockdown: state.service.lockdown_active(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
