//! Shared state and response types for the HTTP API

#[cfg(feature = "http-api")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "http-api")]
use std::{sync::Arc, time::Instant};

#[cfg(feature = "http-api")]
use crate::review::ReviewWorkflowService;

/// State shared by every handler
#[cfg(feature = "http-api")]
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReviewWorkflowService>,
    pub started_at: Instant,
}

#[cfg(feature = "http-api")]
impl AppState {
    pub fn new(service: Arc<ReviewWorkflowService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }
}

/// Health check response
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,
    /// Whether the emergency lockdown is engaged
    pub lockdown: bool,
    pub uptime_seconds: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Query string of `POST /submit`
#[cfg(feature = "http-api")]
#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    pub submitter: Option<String>,
}

/// Query string of `POST /lockdown`
#[cfg(feature = "http-api")]
#[derive(Debug, Default, Deserialize)]
pub struct LockdownParams {
    pub mode: Option<String>,
}
