//! Request failures and their HTTP rendering.
//!
//! Every failure reaches the client as `{"error": "<message>"}` with a fixed
//! message per kind. Details (store errors, parse errors) go to the log only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keybind_auth::CryptoError;
use serde::Serialize;

use crate::store::StoreError;

/// Why a request was refused.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Missing or null parameters")]
    MissingParameters,

    #[error("Invalid APK Signature")]
    InvalidApkSignature,

    #[error("Error during decryption")]
    Decryption(#[source] CryptoError),

    #[error("The data does not contain any key attestation")]
    AttestationMissing,

    /// Enrollment signature over `data` did not verify.
    #[error("Signature verification failed.")]
    EnrollmentSignature,

    /// Redemption signature over the code did not verify.
    #[error("Invalid signature.")]
    RedemptionSignature,

    #[error("Code not found.")]
    CodeNotFound,

    #[error("Database error")]
    Database(#[from] StoreError),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Anything else; the detail is logged, never returned.
    #[error("Unexpected error")]
    Unexpected(String),
}

impl ApiError {
    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson
            | Self::MissingParameters
            | Self::AttestationMissing
            | Self::EnrollmentSignature
            | Self::RedemptionSignature => StatusCode::BAD_REQUEST,
            Self::InvalidApkSignature => StatusCode::UNAUTHORIZED,
            Self::CodeNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Decryption(_) | Self::Database(_) | Self::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Decryption(e) => tracing::warn!(error = %e, "Envelope decryption failed"),
            Self::Database(e) => tracing::error!(error = %e, "Record store failure"),
            Self::Unexpected(detail) => tracing::error!(detail = %detail, "Unexpected error"),
            _ => {}
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
