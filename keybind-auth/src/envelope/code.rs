//! One-time redemption codes.

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use super::CryptoError;
use crate::identity::PublicKey;

/// Length of a one-time code in characters.
pub const ONE_TIME_CODE_LEN: usize = 32;

/// Generate a random 32-character alphanumeric code (`[A-Za-z0-9]`).
///
/// The code is a bearer credential and the lookup key for redemption, so it
/// comes straight from the OS random source with uniform sampling.
#[must_use]
pub fn generate_one_time_code() -> String {
    Alphanumeric.sample_string(&mut OsRng, ONE_TIME_CODE_LEN)
}

/// Check that input has the shape of a code this server could have issued.
#[must_use]
pub fn is_well_formed_code(input: &str) -> bool {
    input.len() == ONE_TIME_CODE_LEN && input.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Encrypt a code so that only the holder of the device private key can read it.
///
/// This, rather than the transport, is what binds a code to the attested key.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the device key is too small to carry
/// the code under PKCS#1 v1.5 padding.
pub fn wrap_code_for_device(code: &str, device_key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    device_key
        .encrypt(code.as_bytes())
        .map_err(|_| CryptoError::Encryption)
}
