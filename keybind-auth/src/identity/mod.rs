//! Cryptographic identity types for the key exchange.
//!
//! This module provides RSA keys for both ends of the protocol:
//!
//! - [`ServerKeyPair`] - The process-lifetime server key (unwraps enrollment
//!   keys, signs redemption timestamps)
//! - [`PublicKey`] - An RSA verification/encryption key, server or device
//! - [`Signature`] - A detached PKCS#1 v1.5 SHA-256 signature
//!
//! # Security Properties
//!
//! - The private key is zeroized on drop and has no `Debug` implementation
//! - Verification never panics or errors on malformed signatures; it returns `false`
//!
//! # Example
//!
//! ```
//! use keybind_auth::identity::ServerKeyPair;
//!
//! let server = ServerKeyPair::generate(1024).unwrap();
//! let signature = server.sign_timestamp(1_700_000_000);
//! assert!(server.public_key().verify(b"1700000000", &signature));
//! ```

mod keys;

pub use keys::{KeyError, PublicKey, ServerKeyPair, Signature, DEFAULT_RSA_BITS, MIN_RSA_BITS};
