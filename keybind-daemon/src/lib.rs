//! Keybind daemon library.
//!
//! HTTP service that enrolls devices holding a hardware-attested RSA key and
//! later releases a per-device session key to the holder of the one-time
//! code issued at enrollment. Protocol logic lives in `keybind-auth`; this
//! crate adds storage, transport and configuration.

pub mod config;
pub mod db;
pub mod http;
pub mod services;
pub mod store;

pub use config::Config;
pub use db::SqliteDeviceStore;
pub use http::{router, AppState};
pub use store::{DeviceRecord, DeviceRecordStore, StoreError};
