//! Rate limiting for the POST endpoints.
//!
//! Off unless configured. When on, one shared bucket is drawn from only by
//! requests presenting the application secret: callers without it are
//! refused by the handlers before any decryption and cannot starve devices
//! that hold it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::request::{presented_secret, SharedSecret};
use super::ApiError;

/// Burst allowance when a rate is configured without one.
pub const DEFAULT_BURST: u32 = 10;

/// Token-bucket limiter shared by all request handlers.
#[derive(Clone)]
pub struct RequestRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RequestRateLimiter {
    /// Create a new rate limiter with the specified requests per second and burst size.
    ///
    /// # Arguments
    ///
    /// * `per_second` - Number of requests allowed per second (sustained rate)
    /// * `burst_size` - Maximum burst size (allows temporary spikes)
    ///
    /// Returns `None` when `per_second` is zero, which disables limiting. A
    /// zero `burst_size` means a burst equal to `per_second`.
    pub fn new(per_second: u32, burst_size: u32) -> Option<Self> {
        let per_second = NonZeroU32::new(per_second)?;
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(per_second);

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Some(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Check if a request should be allowed.
    pub fn check(&self) -> Result<(), ApiError> {
        match self.limiter.check() {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!("Rate limit exceeded");
                Err(ApiError::RateLimited)
            }
        }
    }
}

/// Middleware state: the bucket and the secret that qualifies a request
/// for it.
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: RequestRateLimiter,
    secret: SharedSecret,
}

impl RateLimitGate {
    pub fn new(limiter: RequestRateLimiter, secret: SharedSecret) -> Self {
        Self { limiter, secret }
    }
}

/// Middleware rejecting authenticated requests over the limit with 429.
///
/// Install with `axum::middleware::from_fn_with_state(gate, enforce)`.
pub async fn enforce(State(gate): State<RateLimitGate>, request: Request, next: Next) -> Response {
    if gate.secret.matches(presented_secret(request.headers())) {
        if let Err(e) = gate.limiter.check() {
            return e.into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SIGNATURE_HEADER;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    const SECRET: &str = "apk-sig";

    fn gated_app(per_second: u32, burst_size: u32) -> Router {
        let limiter = RequestRateLimiter::new(per_second, burst_size).expect("limiting enabled");
        let gate = RateLimitGate::new(limiter, SharedSecret::new(SECRET));
        Router::new()
            .route("/data", post(|| async { "through" }))
            .route_layer(middleware::from_fn_with_state(gate, enforce))
    }

    async fn post_with(app: &Router, secret: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method("POST").uri("/data");
        if let Some(secret) = secret {
            builder = builder.header(SIGNATURE_HEADER, secret);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_over_limit_is_429_with_error_body() {
        let app = gated_app(1, 2);

        for _ in 0..2 {
            assert_eq!(post_with(&app, Some(SECRET)).await.0, StatusCode::OK);
        }

        let (status, body) = post_with(&app, Some(SECRET)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Rate limit exceeded" }));
    }

    #[tokio::test]
    async fn test_requests_without_secret_do_not_draw_from_bucket() {
        let app = gated_app(1, 1);

        for secret in [None, Some("wrong"), Some(""), None, Some("apk-sig ")] {
            // Passed through to the handler, which refuses them itself
            assert_eq!(post_with(&app, secret).await.0, StatusCode::OK);
        }

        assert_eq!(post_with(&app, Some(SECRET)).await.0, StatusCode::OK);
        assert_eq!(
            post_with(&app, Some(SECRET)).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );

        // Once the bucket is empty, unauthenticated requests still get through
        assert_eq!(post_with(&app, None).await.0, StatusCode::OK);
    }

    #[test]
    fn test_zero_rate_disables() {
        assert!(RequestRateLimiter::new(0, 10).is_none());
        assert!(RequestRateLimiter::new(0, 0).is_none());
    }

    #[test]
    fn test_zero_burst_uses_rate() {
        let limiter = RequestRateLimiter::new(3, 0).unwrap();
        for _ in 0..3 {
            assert!(limiter.check().is_ok());
        }
        assert!(matches!(limiter.check(), Err(ApiError::RateLimited)));
    }

    #[test]
    fn test_explicit_burst_overrides_rate() {
        let limiter = RequestRateLimiter::new(1, DEFAULT_BURST).unwrap();
        for _ in 0..DEFAULT_BURST {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
