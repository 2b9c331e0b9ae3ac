//! Envelope error types.

/// Errors that can occur while sealing or opening protocol envelopes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// A transported field is not valid base64.
    #[error("malformed base64 in {field}")]
    Encoding { field: &'static str },

    /// The wrapped session key could not be decrypted with the server key.
    #[error("session key unwrap failed")]
    KeyUnwrap,

    /// The symmetric key or IV has the wrong length for AES-256-CBC.
    #[error("invalid symmetric key or IV length")]
    InvalidLength,

    /// The ciphertext did not decrypt to correctly padded plaintext.
    #[error("symmetric decryption failed")]
    Padding,

    /// The plaintext is not a well-formed attestation record.
    #[error("decrypted payload is not a valid attestation record")]
    MalformedPayload,

    /// Asymmetric encryption to a device key failed.
    #[error("encryption failed")]
    Encryption,
}
