//! Request body decoding and caller authentication.
//!
//! Both POST endpoints share the same front door: decode the body, check that
//! every required field is a non-blank string, then compare the
//! `X-Signature` header with the configured application secret. Only then
//! does any cryptography run.

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::error::Category;
use subtle::ConstantTimeEq;

use keybind_auth::EnrollmentEnvelope;

use super::ApiError;

/// Header carrying the application secret.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// The raw `X-Signature` value, if present and valid UTF-8.
pub fn presented_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Decode a JSON body.
///
/// Syntax errors map to `InvalidJson`; well-formed JSON of the wrong shape
/// (missing field, `null`, non-string) maps to `MissingParameters`.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| match e.classify() {
        Category::Data => ApiError::MissingParameters,
        Category::Syntax | Category::Eof | Category::Io => ApiError::InvalidJson,
    })
}

fn required(value: Option<String>) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::MissingParameters),
    }
}

/// Body of `POST /data`.
#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    #[serde(rename = "aesKey")]
    aes_key: Option<String>,
    data: Option<String>,
    iv: Option<String>,
    signature: Option<String>,
}

impl EnrollmentRequest {
    /// Require all four fields; values are kept exactly as sent.
    pub fn into_envelope(self) -> Result<EnrollmentEnvelope, ApiError> {
        Ok(EnrollmentEnvelope {
            aes_key: required(self.aes_key)?,
            data: required(self.data)?,
            iv: required(self.iv)?,
            signature: required(self.signature)?,
        })
    }
}

/// Body of `POST /getkey`.
#[derive(Debug, Deserialize)]
pub struct RedemptionRequest {
    code: Option<String>,
    signature: Option<String>,
}

impl RedemptionRequest {
    /// Require both fields, returning `(code, signature)`.
    pub fn into_parts(self) -> Result<(String, String), ApiError> {
        Ok((required(self.code)?, required(self.signature)?))
    }
}

/// The application secret every POST must present.
#[derive(Clone)]
pub struct SharedSecret(std::sync::Arc<str>);

impl SharedSecret {
    pub fn new(secret: impl Into<std::sync::Arc<str>>) -> Self {
        Self(secret.into())
    }

    /// Constant-time comparison against the presented header value.
    pub fn matches(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|p| bool::from(p.as_bytes().ct_eq(self.0.as_bytes())))
    }

    /// Like [`SharedSecret::matches`], as a request outcome.
    pub fn check(&self, presented: Option<&str>) -> Result<(), ApiError> {
        if self.matches(presented) {
            return Ok(());
        }
        tracing::warn!(present = presented.is_some(), "Rejected application secret");
        Err(ApiError::InvalidApkSignature)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}
