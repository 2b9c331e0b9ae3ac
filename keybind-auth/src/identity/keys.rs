//! RSA key types for the server identity and for enrolled devices.
//!
//! This module provides RSA keys with proper secret handling:
//! - The server private key is zeroized on drop (via `RsaPrivateKey`)
//! - No Debug/Display implementations that leak secrets
//! - Public keys travel as SPKI PEM, the same encoding stored per device
//! - All signatures are PKCS#1 v1.5 over SHA-256

use rand::rngs::OsRng;
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Smallest modulus accepted for generated server keys.
pub const MIN_RSA_BITS: usize = 1024;

/// Modulus size used when no explicit size is configured.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The requested modulus is below [`MIN_RSA_BITS`].
    #[error("key size too small: {bits} bits (minimum {MIN_RSA_BITS})")]
    TooSmall { bits: usize },

    /// The random source or prime search failed.
    #[error("key generation failed")]
    Generation,

    /// The provided bytes do not encode an RSA public key.
    #[error("invalid key format")]
    InvalidFormat,

    /// The key could not be serialized.
    #[error("key encoding failed")]
    Encoding,
}

/// The service's long-lived RSA key pair.
///
/// Created once at startup and shared behind an `Arc`. The public half is
/// handed to any client; the private half unwraps enrollment keys and signs
/// redemption timestamps.
///
/// # Security
///
/// - Zeroized on drop (`RsaPrivateKey` implements `ZeroizeOnDrop`)
/// - No `Debug` implementation to prevent accidental logging
/// - Never persisted: a restart invalidates every outstanding wrapped key
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    signer: SigningKey<Sha256>,
    public: PublicKey,
    public_pem: String,
}

// Explicitly NO Debug implementation for ServerKeyPair

impl ServerKeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::TooSmall` below [`MIN_RSA_BITS`] and
    /// `KeyError::Generation` if the prime search fails.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        if bits < MIN_RSA_BITS {
            return Err(KeyError::TooSmall { bits });
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| KeyError::Generation)?;
        Self::from_private_key(private)
    }

    fn from_private_key(private: RsaPrivateKey) -> Result<Self, KeyError> {
        let public = PublicKey(private.to_public_key());
        let public_pem = public.to_pem()?;
        let signer = SigningKey::<Sha256>::new(private.clone());
        Ok(Self {
            private,
            signer,
            public,
            public_pem,
        })
    }

    /// The public half of the pair.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The public half as SPKI PEM (`-----BEGIN PUBLIC KEY-----`).
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Sign a message (PKCS#1 v1.5, SHA-256).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signer.sign(message).to_vec())
    }

    /// Sign the decimal string form of a Unix timestamp.
    ///
    /// A device presents this to downstream consumers as proof that a
    /// redemption happened at `timestamp`.
    #[must_use]
    pub fn sign_timestamp(&self, timestamp: i64) -> Signature {
        self.sign(timestamp.to_string().as_bytes())
    }

    /// Decrypt a PKCS#1 v1.5 ciphertext addressed to this server.
    ///
    /// The plaintext is wrapped in `Zeroizing` since it is always key material.
    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, rsa::Error> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map(Zeroizing::new)
    }
}

/// An RSA public key, either the server's or one bound to a device.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse a DER-encoded SubjectPublicKeyInfo.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not an RSA SPKI
    /// (including well-formed keys of other algorithms, such as EC).
    pub fn from_spki_der(der: &[u8]) -> Result<Self, KeyError> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|_| KeyError::InvalidFormat)
    }

    /// Parse an SPKI PEM document (`-----BEGIN PUBLIC KEY-----`).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the PEM is malformed.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        RsaPublicKey::from_public_key_pem(pem.trim())
            .map(Self)
            .map_err(|_| KeyError::InvalidFormat)
    }

    /// Export as SPKI PEM with `\n` line endings.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Encoding` if serialization fails.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| KeyError::Encoding)
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    /// Verify a PKCS#1 v1.5 SHA-256 signature over a message.
    ///
    /// A malformed or wrong-length signature is simply invalid.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature.as_bytes()) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.0.clone())
            .verify(message, &signature)
            .is_ok()
    }

    /// Encrypt a short message to the holder of the matching private key
    /// (PKCS#1 v1.5 padding).
    pub(crate) fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.0.encrypt(&mut OsRng, Pkcs1v15Encrypt, message)
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(rsa-{})", self.bits())
    }
}

/// A detached PKCS#1 v1.5 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Wrap raw signature bytes. Length is checked at verification time,
    /// against the modulus of the verifying key.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Borrow the raw signature bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show only the first 4 bytes for debugging
        match self.0.get(..4) {
            Some(b) => write!(f, "Signature({:02x}{:02x}{:02x}{:02x}...)", b[0], b[1], b[2], b[3]),
            None => write!(f, "Signature(<{} bytes>)", self.0.len()),
        }
    }
}
