//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store construction (in-memory vs Postgres)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::time::Duration;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::SharedJobStore;

/// Staleness threshold applied by the `POST /jobs/sweep` trigger.
#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub stale_after: Duration,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(store: SharedJobStore, sweep: SweepSettings) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/jobs", routes::jobs::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(store))
                .layer(Extension(sweep)),
        )
}
