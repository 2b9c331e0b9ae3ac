//! Attestation certificate inspection.
//!
//! A device proves its key lives in secure hardware by presenting the
//! platform attestation certificate for that key. The presence of the vendor
//! attestation extension is taken as that proof; chain-of-trust validation is
//! not performed here.
//!
//! # Security
//!
//! - Input is limited to 16KB to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use x509_parser::prelude::*;

use crate::envelope::{decode_base64, CryptoError};
use crate::identity::{KeyError, PublicKey};

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Android KeyStore key attestation extension.
pub const ANDROID_KEY_ATTESTATION_OID: &str = "1.3.6.1.4.1.11129.2.1.17";

/// Alias token embedded by the client in an extension value.
static KEY_ALIAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"keyAlias_[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .expect("static pattern")
});

/// Errors that can occur during certificate inspection.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("certificate is not valid base64")]
    Encoding(#[from] CryptoError),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("certificate has no key attestation extension")]
    AttestationMissing,

    #[error("unusable subject public key: {0}")]
    Key(#[from] KeyError),
}

/// What a successfully inspected attestation certificate yields.
#[derive(Debug, Clone)]
pub struct VerifiedAttestation {
    /// The attested device key.
    pub public_key: PublicKey,
    /// Alias token found in the extensions, if any.
    pub key_alias: Option<String>,
}

/// Checks attestation certificates for a configured vendor extension.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    oid: String,
}

impl AttestationVerifier {
    /// Create a verifier that requires the extension with dotted OID `oid`.
    pub fn new(oid: impl Into<String>) -> Self {
        Self { oid: oid.into() }
    }

    /// The extension OID this verifier requires.
    #[must_use]
    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// Decode a base64 DER certificate and inspect it.
    ///
    /// # Errors
    ///
    /// See [`AttestationVerifier::verify_der`]; additionally
    /// `CertError::Encoding` for bad base64.
    pub fn verify_base64(&self, cert_b64: &str) -> Result<VerifiedAttestation, CertError> {
        let der = decode_base64("attestationCertificate", cert_b64)?;
        self.verify_der(&der)
    }

    /// Inspect a DER-encoded certificate.
    ///
    /// Checks run in order: parse, attestation extension, alias scan,
    /// subject key. A certificate without the extension is rejected before
    /// its key is looked at.
    ///
    /// # Errors
    ///
    /// Returns `CertError::TooLarge` if the certificate exceeds 16KB,
    /// `CertError::ParseError` if it is malformed,
    /// `CertError::AttestationMissing` if the extension is absent, and
    /// `CertError::Key` if the subject key is not RSA.
    pub fn verify_der(&self, cert_der: &[u8]) -> Result<VerifiedAttestation, CertError> {
        // Input size validation (DoS protection)
        if cert_der.len() > MAX_CERT_SIZE {
            return Err(CertError::TooLarge(cert_der.len()));
        }

        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;

        let extensions = cert.extensions();
        if !extensions
            .iter()
            .any(|ext| ext.oid.to_id_string() == self.oid)
        {
            return Err(CertError::AttestationMissing);
        }

        let key_alias = extract_key_alias(extensions.iter().map(|ext| ext.value));
        let public_key = PublicKey::from_spki_der(cert.public_key().raw)?;

        Ok(VerifiedAttestation {
            public_key,
            key_alias,
        })
    }
}

impl Default for AttestationVerifier {
    fn default() -> Self {
        Self::new(ANDROID_KEY_ATTESTATION_OID)
    }
}

/// Return the first alias token found in any of the extension values.
///
/// Values are binary DER; they are scanned as lossy UTF-8.
pub fn extract_key_alias<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Option<String> {
    values.into_iter().find_map(|value| {
        KEY_ALIAS_PATTERN
            .find(&String::from_utf8_lossy(value))
            .map(|m| m.as_str().to_string())
    })
}

/// Check that `s` is a dotted-decimal object identifier with at least two arcs.
#[must_use]
pub fn is_valid_oid(s: &str) -> bool {
    let arcs: Vec<&str> = s.split('.').collect();
    arcs.len() >= 2
        && arcs
            .iter()
            .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()))
}
