//! SQLite-backed device record store.
//!
//! Wraps SQLite access via sqlx. The schema is created on open; there is a
//! single table keyed by device identifier.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::store::{DeviceRecord, DeviceRecordStore, StoreError};

/// Device records persisted in SQLite.
#[derive(Clone)]
pub struct SqliteDeviceStore {
    pool: SqlitePool,
}

impl SqliteDeviceStore {
    /// Open or create the database at `url` (e.g. `sqlite:keybind.db?mode=rwc`
    /// or `sqlite::memory:`).
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            // NORMAL sync balances durability vs speed
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        if !url.contains(":memory:") {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite performs best with single writer
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_records (
                device_id TEXT PRIMARY KEY,
                public_key TEXT NOT NULL,
                key_alias TEXT,
                phone_number TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,
                session_key TEXT NOT NULL,
                session_iv TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                redeemed_at INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DeviceRecordStore for SqliteDeviceStore {
    async fn upsert(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        // Single statement: a concurrent reader sees the old row or the new
        // one, never a mix.
        sqlx::query(
            r#"
            INSERT INTO device_records (
                device_id, public_key, key_alias, phone_number, code,
                session_key, session_iv, issued_at, redeemed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
            ON CONFLICT (device_id) DO UPDATE SET
                public_key = excluded.public_key,
                key_alias = excluded.key_alias,
                phone_number = excluded.phone_number,
                code = excluded.code,
                session_key = excluded.session_key,
                session_iv = excluded.session_iv,
                issued_at = excluded.issued_at,
                redeemed_at = NULL
            "#,
        )
        .bind(&record.device_id)
        .bind(&record.public_key_pem)
        .bind(&record.key_alias)
        .bind(&record.phone_number)
        .bind(&record.code)
        .bind(&record.session_key)
        .bind(&record.session_iv)
        .bind(record.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM device_records WHERE code = ? AND redeemed_at IS NULL",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn find_by_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM device_records WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn consume_code(
        &self,
        device_id: &str,
        code: &str,
        redeemed_at: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE device_records SET redeemed_at = ? WHERE device_id = ? AND code = ? AND redeemed_at IS NULL",
        )
        .bind(redeemed_at)
        .bind(device_id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        // If no rows were updated, someone else consumed the code
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_record(row: &SqliteRow) -> DeviceRecord {
    DeviceRecord {
        device_id: row.get("device_id"),
        public_key_pem: row.get("public_key"),
        key_alias: row.get("key_alias"),
        phone_number: row.get("phone_number"),
        code: row.get("code"),
        session_key: row.get("session_key"),
        session_iv: row.get("session_iv"),
        issued_at: row.get("issued_at"),
        redeemed_at: row.get("redeemed_at"),
    }
}
