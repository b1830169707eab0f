//! HTTP API module for the plan review service
//!
//! The entire module is conditionally compiled based on the `http-api` feature flag.

#[cfg(feature = "http-api")]
pub mod server;

#[cfg(feature = "http-api")]
pub mod routes;

#[cfg(feature = "http-api")]
pub mod middleware;

#[cfg(feature = "http-api")]
pub mod types;

#[cfg(feature = "http-api")]
pub use server::{create_router, HttpApiServer, ServerError};

#[cfg(feature = "http-api")]
pub use types::{AppState, HealthResponse};
