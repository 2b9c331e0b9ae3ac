//! HTTP surface: routes, shared state, body limits.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::trace::TraceLayer;

use keybind_auth::ServerKeyPair;

use crate::services::{
    enforce_rate_limit, presented_secret, ApiError, EnrollmentResponse, EnrollmentService,
    RateLimitGate, RedemptionResponse, RedemptionService, RequestRateLimiter, SharedSecret,
};

/// Largest request body accepted (64 KiB).
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub server_key: Arc<ServerKeyPair>,
    pub secret: SharedSecret,
    pub enrollment: EnrollmentService,
    pub redemption: RedemptionService,
}

/// Build the application router.
///
/// `GET /pubkey` and `GET /health` are unauthenticated and never rate
/// limited. The POST endpoints go through `limiter` when one is given; only
/// requests presenting the application secret draw from it.
pub fn router(state: AppState, limiter: Option<RequestRateLimiter>) -> Router {
    let mut protected = Router::new()
        .route("/data", post(enroll))
        .route("/getkey", post(redeem));
    if let Some(limiter) = limiter {
        let gate = RateLimitGate::new(limiter, state.secret.clone());
        protected =
            protected.route_layer(middleware::from_fn_with_state(gate, enforce_rate_limit));
    }

    Router::new()
        .route("/pubkey", get(public_key))
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn public_key(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.server_key.public_key_pem().to_string(),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    state
        .enrollment
        .enroll(presented_secret(&headers), &body)
        .await
        .map(Json)
}

async fn redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RedemptionResponse>, ApiError> {
    state
        .redemption
        .redeem(presented_secret(&headers), &body)
        .await
        .map(Json)
}
