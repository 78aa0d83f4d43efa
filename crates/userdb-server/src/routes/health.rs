//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::feed::FeedState;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Server version.
    pub version: String,
    /// Wire protocol version.
    pub protocol_version: u32,
    /// Whether the store answers reads.
    pub store: bool,
    /// Feed processor state.
    pub feed: FeedState,
    /// Open watch subscriptions.
    pub subscribers: usize,
}

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state
        .run_blocking(|service| service.store().ping())
        .await
        .is_ok();
    let feed = state.feed_state.borrow().clone();
    let healthy = store && feed.is_healthy();

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: userdb_proto::PROTOCOL_VERSION,
        store,
        feed,
        subscribers: state.notifier.subscriber_count(),
    })
}
