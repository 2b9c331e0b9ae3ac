//! Device record storage.
//!
//! The services talk to storage through [`DeviceRecordStore`] so tests can
//! substitute their own backend. [`crate::db::SqliteDeviceStore`] is the
//! production implementation.

use async_trait::async_trait;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything the service remembers about one enrolled device.
///
/// One record per `device_id`; re-enrolling replaces every field, which
/// also invalidates the previous code.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    /// Attested device key, SPKI PEM.
    pub public_key_pem: String,
    pub key_alias: Option<String>,
    pub phone_number: String,
    /// One-time code handed to the device at enrollment.
    pub code: String,
    /// Base64 AES-256 key for the enrollment file.
    pub session_key: String,
    /// Base64 CBC IV for the enrollment file.
    pub session_iv: String,
    /// Unix seconds at which the code was issued.
    pub issued_at: i64,
    /// Unix seconds at which the code was redeemed, when codes are consumed.
    pub redeemed_at: Option<i64>,
}

impl std::fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("device_id", &self.device_id)
            .field("key_alias", &self.key_alias)
            .field("issued_at", &self.issued_at)
            .field("redeemed_at", &self.redeemed_at)
            .finish_non_exhaustive()
    }
}

/// Persistent storage for device records.
#[async_trait]
pub trait DeviceRecordStore: Send + Sync {
    /// Insert or fully replace the record for `record.device_id`.
    ///
    /// Must be atomic: concurrent upserts for one device leave exactly one
    /// complete record behind.
    async fn upsert(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    /// All unredeemed records holding `code`.
    ///
    /// Callers treat anything other than exactly one match as "not found".
    async fn find_by_code(&self, code: &str) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Look up a device's current record.
    async fn find_by_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError>;

    /// Mark `code` redeemed for `device_id` if it still is the live code.
    ///
    /// Returns `false` when another request redeemed it first or the device
    /// has re-enrolled since.
    async fn consume_code(
        &self,
        device_id: &str,
        code: &str,
        redeemed_at: i64,
    ) -> Result<bool, StoreError>;
}

/// Current Unix time in whole seconds.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
