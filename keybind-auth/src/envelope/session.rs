//! Per-enrollment symmetric session material and AES-256-CBC helpers.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{decode_base64, CryptoError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// CBC IV length in bytes (one AES block).
pub const SESSION_IV_LEN: usize = 16;

/// A random AES-256 key and CBC IV issued to one enrolled device.
///
/// # Security
///
/// - Zeroized on drop
/// - No `Debug` implementation
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionMaterial {
    key: [u8; SESSION_KEY_LEN],
    iv: [u8; SESSION_IV_LEN],
}

impl SessionMaterial {
    /// Generate a fresh key and IV from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut material = Self {
            key: [0u8; SESSION_KEY_LEN],
            iv: [0u8; SESSION_IV_LEN],
        };
        OsRng.fill_bytes(&mut material.key);
        OsRng.fill_bytes(&mut material.iv);
        material
    }

    /// Load key material from raw slices.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidLength` unless the key is 32 bytes and
    /// the IV 16 bytes.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_LEN] = key.try_into().map_err(|_| CryptoError::InvalidLength)?;
        let iv: [u8; SESSION_IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidLength)?;
        Ok(Self { key, iv })
    }

    /// Load key material from the base64 form returned by redemption.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encoding` for bad base64 and
    /// `CryptoError::InvalidLength` for wrong sizes.
    pub fn from_base64(key: &str, iv: &str) -> Result<Self, CryptoError> {
        let key = Zeroizing::new(decode_base64("key1", key)?);
        let iv = decode_base64("iv_1", iv)?;
        Self::from_slices(&key, &iv)
    }

    /// The raw AES key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The raw CBC IV.
    #[must_use]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// The key as standard padded base64, the form stored per device.
    #[must_use]
    pub fn key_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    /// The IV as standard padded base64.
    #[must_use]
    pub fn iv_base64(&self) -> String {
        STANDARD.encode(self.iv)
    }
}

/// Encrypt bytes for the device that owns `session` (AES-256-CBC, PKCS#7).
#[must_use]
pub fn wrap_file_for_device(file_bytes: &[u8], session: &SessionMaterial) -> Vec<u8> {
    Aes256CbcEnc::new(
        GenericArray::from_slice(&session.key),
        GenericArray::from_slice(&session.iv),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(file_bytes)
}

/// Inverse of [`wrap_file_for_device`], as run on the device.
///
/// # Errors
///
/// Returns `CryptoError::Padding` if the ciphertext was not produced under
/// this session material.
pub fn decrypt_with_session(
    ciphertext: &[u8],
    session: &SessionMaterial,
) -> Result<Vec<u8>, CryptoError> {
    decrypt_cbc(&session.key, &session.iv, ciphertext).map(|plain| plain.to_vec())
}

/// AES-256-CBC encryption under caller-supplied key and IV slices.
pub(crate) fn encrypt_cbc(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidLength)?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// AES-256-CBC decryption under caller-supplied key and IV slices.
pub(crate) fn decrypt_cbc(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidLength)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Padding)
}
