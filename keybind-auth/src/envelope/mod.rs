//! Hybrid-encrypted envelopes exchanged during enrollment.
//!
//! The enrollment flow is:
//! 1. Device fetches the server public key (`GET /pubkey`)
//! 2. Device encrypts an [`AttestationPayload`] under a random AES-256 key,
//!    wraps that key with the server key (RSA PKCS#1 v1.5), and signs the
//!    base64 ciphertext string with its attested key
//! 3. Server opens the [`EnrollmentEnvelope`] with [`unwrap_envelope`]
//! 4. Server checks the detached signature against the certificate key
//! 5. Server answers with a file under fresh [`SessionMaterial`] and a
//!    one-time code encrypted to the device key
//!
//! # Security
//!
//! - The detached signature covers the base64 *text* of the ciphertext as
//!   transmitted, not the decoded bytes; clients depend on this encoding
//! - Decryption failures are reported without distinguishing key mismatch
//!   from corruption

mod code;
mod error;
mod session;

pub use code::{
    generate_one_time_code, is_well_formed_code, wrap_code_for_device, ONE_TIME_CODE_LEN,
};
pub use error::CryptoError;
pub use session::{
    decrypt_with_session, wrap_file_for_device, SessionMaterial, SESSION_IV_LEN, SESSION_KEY_LEN,
};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::identity::{PublicKey, ServerKeyPair, Signature};

/// Base64 decoder accepting both padded and unpadded input.
///
/// Android's `Base64.DEFAULT` wraps lines, so whitespace is stripped before
/// decoding (see [`decode_base64`]).
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a transported base64 field, ignoring embedded whitespace.
///
/// # Errors
///
/// Returns `CryptoError::Encoding` naming `field` if the value is not base64.
pub fn decode_base64(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT
        .decode(compact)
        .map_err(|_| CryptoError::Encoding { field })
}

/// Encode bytes for transport (standard alphabet, padded, no line breaks).
#[must_use]
pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

/// The four base64 fields of an enrollment request, exactly as received.
///
/// Fields stay in their transported text form: the signature is checked
/// against `data` byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentEnvelope {
    /// Session key wrapped with the server public key.
    pub aes_key: String,
    /// AES-256-CBC ciphertext of the JSON [`AttestationPayload`].
    pub data: String,
    /// CBC initialization vector.
    pub iv: String,
    /// Device signature over the `data` string.
    pub signature: String,
}

/// The plaintext record carried inside an [`EnrollmentEnvelope`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    /// Stable platform identifier of the device.
    #[serde(alias = "androidId")]
    pub device_identifier: String,
    /// Phone number to associate with the device.
    pub phone_number: String,
    /// Base64 DER attestation certificate for the device key.
    #[serde(alias = "attestation")]
    pub attestation_certificate: String,
}

impl std::fmt::Debug for AttestationPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Phone number and certificate omitted: PII and bulk
        f.debug_struct("AttestationPayload")
            .field("device_identifier", &self.device_identifier)
            .finish_non_exhaustive()
    }
}

/// Open an enrollment envelope with the server private key.
///
/// RSA-unwraps the session key, AES-256-CBC decrypts `data` under it and the
/// supplied IV, then decodes the plaintext as an [`AttestationPayload`].
///
/// # Errors
///
/// Any failure is a `CryptoError`; callers report all of them as a single
/// decryption failure.
pub fn unwrap_envelope(
    envelope: &EnrollmentEnvelope,
    server_key: &ServerKeyPair,
) -> Result<AttestationPayload, CryptoError> {
    let wrapped_key = decode_base64("aesKey", &envelope.aes_key)?;
    let ciphertext = decode_base64("data", &envelope.data)?;
    let iv = decode_base64("iv", &envelope.iv)?;

    let session_key = server_key
        .decrypt(&wrapped_key)
        .map_err(|_| CryptoError::KeyUnwrap)?;
    let plaintext = session::decrypt_cbc(&session_key, &iv, &ciphertext)?;

    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::MalformedPayload)
}

/// Verify a base64 detached signature over `signed_bytes`.
///
/// Returns `false` for undecodable or invalid signatures; never errors.
#[must_use]
pub fn verify_detached_signature(
    public_key: &PublicKey,
    signature_b64: &str,
    signed_bytes: &[u8],
) -> bool {
    match decode_base64("signature", signature_b64) {
        Ok(raw) => public_key.verify(signed_bytes, &Signature::from_bytes(&raw)),
        Err(_) => false,
    }
}

/// The encrypted half of an envelope, as produced on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub aes_key: String,
    pub data: String,
    pub iv: String,
}

/// Device-side counterpart of [`unwrap_envelope`]: encrypt a payload to the
/// server under a fresh session key.
///
/// The caller signs the returned `data` string with its attested key to
/// complete the envelope.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the server key cannot wrap the
/// session key.
pub fn seal_payload(
    payload: &AttestationPayload,
    server_public: &PublicKey,
) -> Result<SealedPayload, CryptoError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|_| CryptoError::MalformedPayload)?,
    );
    let session = SessionMaterial::generate();
    let ciphertext = session::encrypt_cbc(session.key(), session.iv(), &plaintext)?;
    let wrapped_key = server_public
        .encrypt(session.key())
        .map_err(|_| CryptoError::Encryption)?;

    Ok(SealedPayload {
        aes_key: encode_base64(wrapped_key),
        data: encode_base64(ciphertext),
        iv: session.iv_base64(),
    })
}
