//! The inbound HTTP adapter: a `POST /` handler that reads a `RunRequest`
//! body, drives it through `durable_runtime::Engine`, and writes back the
//! `RunResponse` — the concrete collaborator spec.md §2 calls the external
//! HTTP adapter.

use crate::auth::{self, Verification};
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use durable_runtime::Engine;
use durable_proto::{RunRequest, RunResponse};
use std::sync::Arc;

/// Builds the router that answers the scheduler's RunRequests against
/// `engine`. When `verification` is set, every request is checked against
/// it before reaching `run` (spec §6's `verification_key` option).
pub fn router(engine: Arc<Engine>, verification: Option<Verification>) -> axum::Router {
    axum::Router::new()
        .route("/", post(run))
        .route_layer(axum::middleware::from_fn_with_state(verification, auth::verify_signature))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(engine)
}

#[tracing::instrument(skip_all, fields(function = %request.function))]
async fn run(State(engine): State<Arc<Engine>>, Json(request): Json<RunRequest>) -> Json<RunResponse> {
    Json(engine.handle(request).await)
}
