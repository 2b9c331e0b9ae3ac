//! `POST /getkey`: exchange a one-time code for the session key.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use keybind_auth::envelope::{encode_base64, is_well_formed_code, verify_detached_signature};
use keybind_auth::{PublicKey, ServerKeyPair};

use super::request::{parse_body, RedemptionRequest, SharedSecret};
use super::ApiError;
use crate::store::{current_timestamp, DeviceRecordStore};

/// Lifetime rules for issued codes.
///
/// The default keeps codes valid, and reusable, until the device re-enrolls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionPolicy {
    /// Codes older than this are treated as unknown.
    pub code_ttl: Option<Duration>,
    /// Mark a code redeemed on first successful use.
    pub consume_codes: bool,
}

/// Session material released to the device, with a server-signed timestamp.
#[derive(Debug, Serialize)]
pub struct RedemptionResponse {
    pub iv_1: String,
    pub key1: String,
    pub timestamp: i64,
    pub signed_timestamp: String,
}

/// Releases stored session material to the holder of a valid code.
#[derive(Clone)]
pub struct RedemptionService {
    store: Arc<dyn DeviceRecordStore>,
    server_key: Arc<ServerKeyPair>,
    secret: SharedSecret,
    policy: RedemptionPolicy,
}

impl RedemptionService {
    /// Create a new redemption service.
    pub fn new(
        store: Arc<dyn DeviceRecordStore>,
        server_key: Arc<ServerKeyPair>,
        secret: SharedSecret,
        policy: RedemptionPolicy,
    ) -> Self {
        Self {
            store,
            server_key,
            secret,
            policy,
        }
    }

    /// Handle one redemption request.
    pub async fn redeem(
        &self,
        presented_secret: Option<&str>,
        body: &[u8],
    ) -> Result<RedemptionResponse, ApiError> {
        let (code, signature) = parse_body::<RedemptionRequest>(body)?.into_parts()?;
        self.secret.check(presented_secret)?;

        if !is_well_formed_code(&code) {
            return Err(ApiError::CodeNotFound);
        }

        let mut matches = self.store.find_by_code(&code).await?;
        if matches.len() != 1 {
            if matches.len() > 1 {
                tracing::error!(count = matches.len(), "Code matches several devices");
            }
            return Err(ApiError::CodeNotFound);
        }
        let record = matches.remove(0);

        let now = current_timestamp();
        if let Some(ttl) = self.policy.code_ttl {
            let age = now.saturating_sub(record.issued_at);
            if age > i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
                tracing::info!(device_id = %record.device_id, age, "Code expired");
                return Err(ApiError::CodeNotFound);
            }
        }

        let device_key = PublicKey::from_pem(&record.public_key_pem).map_err(|e| {
            ApiError::Unexpected(format!("stored key for {}: {e}", record.device_id))
        })?;
        if !verify_detached_signature(&device_key, &signature, code.as_bytes()) {
            tracing::warn!(device_id = %record.device_id, "Redemption signature verification failed");
            return Err(ApiError::RedemptionSignature);
        }

        if self.policy.consume_codes
            && !self
                .store
                .consume_code(&record.device_id, &code, now)
                .await?
        {
            tracing::warn!(device_id = %record.device_id, "Code already consumed (concurrent use detected)");
            return Err(ApiError::CodeNotFound);
        }

        tracing::info!(device_id = %record.device_id, "Session key released");

        Ok(RedemptionResponse {
            iv_1: record.session_iv,
            key1: record.session_key,
            timestamp: now,
            signed_timestamp: encode_base64(self.server_key.sign_timestamp(now).as_bytes()),
        })
    }
}
