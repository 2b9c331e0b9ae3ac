//! `POST /data`: attested device enrollment.

use std::sync::Arc;

use serde::Serialize;

use keybind_auth::envelope::{
    encode_base64, generate_one_time_code, unwrap_envelope, verify_detached_signature,
    wrap_code_for_device, wrap_file_for_device,
};
use keybind_auth::{AttestationVerifier, CertError, ServerKeyPair, SessionMaterial};

use super::request::{parse_body, EnrollmentRequest, SharedSecret};
use super::ApiError;
use crate::store::{current_timestamp, DeviceRecord, DeviceRecordStore};

/// Successful enrollment: the file under fresh session material, and the
/// one-time code encrypted to the device key. Both base64.
#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub encrypted_file: String,
    pub encrypted_code: String,
}

/// Verifies enrollment envelopes and records enrolled devices.
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn DeviceRecordStore>,
    server_key: Arc<ServerKeyPair>,
    verifier: AttestationVerifier,
    secret: SharedSecret,
    /// File content handed to every enrolled device.
    payload: Arc<[u8]>,
}

impl EnrollmentService {
    /// Create a new enrollment service.
    pub fn new(
        store: Arc<dyn DeviceRecordStore>,
        server_key: Arc<ServerKeyPair>,
        verifier: AttestationVerifier,
        secret: SharedSecret,
        payload: Arc<[u8]>,
    ) -> Self {
        Self {
            store,
            server_key,
            verifier,
            secret,
            payload,
        }
    }

    /// Handle one enrollment request.
    ///
    /// `presented_secret` is the raw `X-Signature` header, if any.
    pub async fn enroll(
        &self,
        presented_secret: Option<&str>,
        body: &[u8],
    ) -> Result<EnrollmentResponse, ApiError> {
        let envelope = parse_body::<EnrollmentRequest>(body)?.into_envelope()?;
        self.secret.check(presented_secret)?;

        let payload = unwrap_envelope(&envelope, &self.server_key).map_err(ApiError::Decryption)?;
        let device_id = payload.device_identifier.clone();

        tracing::info!(device_id = %device_id, "Enrollment attempt");

        let attested = match self.verifier.verify_base64(&payload.attestation_certificate) {
            Ok(attested) => attested,
            Err(CertError::AttestationMissing) => {
                tracing::warn!(
                    device_id = %device_id,
                    oid = %self.verifier.oid(),
                    "Certificate has no key attestation"
                );
                return Err(ApiError::AttestationMissing);
            }
            Err(e) => {
                return Err(ApiError::Unexpected(format!(
                    "attestation certificate for {device_id}: {e}"
                )));
            }
        };

        // The device signed the base64 ciphertext text, not the decoded bytes
        if !verify_detached_signature(
            &attested.public_key,
            &envelope.signature,
            envelope.data.as_bytes(),
        ) {
            tracing::warn!(device_id = %device_id, "Enrollment signature verification failed");
            return Err(ApiError::EnrollmentSignature);
        }

        let code = generate_one_time_code();
        let session = SessionMaterial::generate();

        // Encrypt both outputs before persisting so a stored code is always
        // one the device was able to receive.
        let encrypted_file = wrap_file_for_device(&self.payload, &session);
        let encrypted_code = wrap_code_for_device(&code, &attested.public_key)
            .map_err(|e| ApiError::Unexpected(format!("code wrap for {device_id}: {e}")))?;
        let public_key_pem = attested
            .public_key
            .to_pem()
            .map_err(|e| ApiError::Unexpected(format!("device key export: {e}")))?;

        let record = DeviceRecord {
            device_id,
            public_key_pem,
            key_alias: attested.key_alias,
            phone_number: payload.phone_number,
            code,
            session_key: session.key_base64(),
            session_iv: session.iv_base64(),
            issued_at: current_timestamp(),
            redeemed_at: None,
        };
        self.store.upsert(&record).await?;

        tracing::info!(
            device_id = %record.device_id,
            key_alias = ?record.key_alias,
            "Device enrolled"
        );

        Ok(EnrollmentResponse {
            encrypted_file: encode_base64(encrypted_file),
            encrypted_code: encode_base64(encrypted_code),
        })
    }
}
