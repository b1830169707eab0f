//! HTTP API server implementation
//!
//! This module provides the main HTTP server implementation using Axum.

#[cfg(feature = "http-api")]
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

#[cfg(feature = "http-api")]
use std::{future::Future, net::SocketAddr, sync::Arc};

#[cfg(feature = "http-api")]
use thiserror::Error;

#[cfg(feature = "http-api")]
use tokio::net::TcpListener;

#[cfg(feature = "http-api")]
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

#[cfg(feature = "http-api")]
use super::middleware::{logging_middleware, security_headers_middleware};

#[cfg(feature = "http-api")]
use super::routes;

#[cfg(feature = "http-api")]
use super::types::AppState;

#[cfg(feature = "http-api")]
use crate::config::ServerConfig;

#[cfg(feature = "http-api")]
use crate::review::ReviewWorkflowService;

/// Startup and serving failures. Both are fatal to the process.
#[cfg(feature = "http-api")]
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Serve(String),
}

/// Build the router with every review endpoint and middleware
#[cfg(feature = "http-api")]
pub fn create_router(service: Arc<ReviewWorkflowService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/submit", post(routes::submit_plan))
        .route("/status/:id", get(routes::get_status))
        .route("/list-pending", get(routes::list_pending))
        .route("/download/:id/:kind", get(routes::download_artifact))
        .route("/upload-signature/:id", post(routes::upload_signature))
        .route("/reject/:id", post(routes::reject_submission))
        .route(
            "/lockdown",
            get(routes::get_lockdown).post(routes::set_lockdown),
        )
        .route("/health", get(routes::health_check))
        .with_state(AppState::new(service))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}

/// HTTP API Server
#[cfg(feature = "http-api")]
pub struct HttpApiServer {
    config: ServerConfig,
    service: Arc<ReviewWorkflowService>,
}

#[cfg(feature = "http-api")]
impl HttpApiServer {
    pub fn new(config: ServerConfig, service: Arc<ReviewWorkflowService>) -> Self {
        Self { config, service }
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn start(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(Arc::clone(&self.service), self.config.max_body_bytes);

        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))?;
        tracing::info!(
            lockdown = self.service.lockdown_active(),
            "Review service listening on {}",
            local
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))
    }
}
