//! Command-line and environment configuration.
//!
//! Every option can come from a flag or from its environment variable; the
//! flag wins when both are set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use keybind_auth::cert::is_valid_oid;
use keybind_auth::identity::{DEFAULT_RSA_BITS, MIN_RSA_BITS};
use keybind_auth::ANDROID_KEY_ATTESTATION_OID;

use crate::services::{RedemptionPolicy, RequestRateLimiter, DEFAULT_BURST};

/// Keybind Daemon - attested device enrollment and key redemption
#[derive(Clone, Parser)]
#[command(name = "keybind-daemon", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "KEYBIND_BIND_ADDR", default_value = "127.0.0.1:4567")]
    pub bind: SocketAddr,

    /// sqlx SQLite connection URL
    #[arg(long, env = "KEYBIND_DATABASE_URL", default_value = "sqlite:keybind.db?mode=rwc")]
    pub database_url: String,

    /// Application secret expected in the X-Signature header
    #[arg(long, env = "APK_SIGN", hide_env_values = true)]
    pub apk_signature: String,

    /// Dotted OID of the required attestation extension
    #[arg(long, env = "KEYBIND_ATTESTATION_OID", default_value = ANDROID_KEY_ATTESTATION_OID)]
    pub attestation_oid: String,

    /// File encrypted and returned to every enrolled device
    #[arg(long, env = "KEYBIND_PAYLOAD_FILE", default_value = "./file.txt")]
    pub payload_file: PathBuf,

    /// Server RSA modulus size, regenerated at every start
    #[arg(long, env = "KEYBIND_RSA_BITS", default_value_t = DEFAULT_RSA_BITS)]
    pub rsa_bits: usize,

    /// Reject codes older than this many seconds (default: no expiry)
    #[arg(long, env = "KEYBIND_CODE_TTL_SECS")]
    pub code_ttl_secs: Option<u64>,

    /// Invalidate a code after its first successful redemption
    #[arg(long, env = "KEYBIND_CONSUME_CODES")]
    pub consume_codes: bool,

    /// Sustained authenticated POST requests per second (default 0: no limiting)
    #[arg(long, env = "KEYBIND_RATE_LIMIT_PER_SECOND", default_value_t = 0)]
    pub rate_limit_per_second: u32,

    /// POST burst allowance
    #[arg(long, env = "KEYBIND_RATE_LIMIT_BURST", default_value_t = DEFAULT_BURST)]
    pub rate_limit_burst: u32,
}

/// Configuration rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("application secret must not be empty")]
    EmptySecret,

    #[error("invalid attestation OID: {0:?}")]
    InvalidOid(String),

    #[error("RSA key size {0} is below the minimum of {MIN_RSA_BITS} bits")]
    RsaBitsTooSmall(usize),

    #[error("code TTL must be at least one second")]
    ZeroTtl,
}

impl Config {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apk_signature.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if !is_valid_oid(&self.attestation_oid) {
            return Err(ConfigError::InvalidOid(self.attestation_oid.clone()));
        }
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(ConfigError::RsaBitsTooSmall(self.rsa_bits));
        }
        if self.code_ttl_secs == Some(0) {
            return Err(ConfigError::ZeroTtl);
        }
        Ok(())
    }

    /// Code lifetime rules for the redemption service.
    pub fn redemption_policy(&self) -> RedemptionPolicy {
        RedemptionPolicy {
            code_ttl: self.code_ttl_secs.map(Duration::from_secs),
            consume_codes: self.consume_codes,
        }
    }

    /// The POST rate limiter, or `None` when disabled.
    pub fn rate_limiter(&self) -> Option<RequestRateLimiter> {
        RequestRateLimiter::new(self.rate_limit_per_second, self.rate_limit_burst)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("database_url", &self.database_url)
            .field("apk_signature", &"<redacted>")
            .field("attestation_oid", &self.attestation_oid)
            .field("payload_file", &self.payload_file)
            .field("rsa_bits", &self.rsa_bits)
            .field("code_ttl_secs", &self.code_ttl_secs)
            .field("consume_codes", &self.consume_codes)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}
