//! Pure protocol library for attested device enrollment and key redemption.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! The service built on top (`keybind-daemon`) supplies transport, storage
//! and configuration.
//!
//! # Example
//!
//! ```ignore
//! use keybind_auth::{envelope::*, AttestationVerifier, ServerKeyPair};
//!
//! let server = ServerKeyPair::generate(2048)?;
//! let payload = unwrap_envelope(&envelope, &server)?;
//! let attested = AttestationVerifier::default()
//!     .verify_base64(&payload.attestation_certificate)?;
//! let ok = verify_detached_signature(
//!     &attested.public_key,
//!     &envelope.signature,
//!     envelope.data.as_bytes(),
//! );
//! ```

pub mod cert;
pub mod envelope;
pub mod identity;

pub use cert::{AttestationVerifier, CertError, VerifiedAttestation, ANDROID_KEY_ATTESTATION_OID};
pub use envelope::{AttestationPayload, CryptoError, EnrollmentEnvelope, SessionMaterial};
pub use identity::{KeyError, PublicKey, ServerKeyPair, Signature};
