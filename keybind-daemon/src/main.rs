//! Keybind Daemon - attested device enrollment and key redemption
//!
//! Generates a fresh server key at startup, opens the device record store,
//! and serves the HTTP API until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use keybind_auth::{AttestationVerifier, ServerKeyPair};
use keybind_daemon::services::{EnrollmentService, RedemptionService, SharedSecret};
use keybind_daemon::{router, AppState, Config, DeviceRecordStore, SqliteDeviceStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    serve(config).await
}

// ============================================================================
// Server
// ============================================================================

async fn serve(config: Config) -> anyhow::Result<()> {
    let payload: Arc<[u8]> = tokio::fs::read(&config.payload_file)
        .await
        .with_context(|| format!("reading payload file {}", config.payload_file.display()))?
        .into();
    tracing::info!(
        path = %config.payload_file.display(),
        bytes = payload.len(),
        "Loaded payload file"
    );

    tracing::info!(url = %config.database_url, "Opening database");
    let store: Arc<dyn DeviceRecordStore> = Arc::new(
        SqliteDeviceStore::open(&config.database_url)
            .await
            .context("opening device record store")?,
    );

    tracing::info!(bits = config.rsa_bits, "Generating server key");
    let bits = config.rsa_bits;
    let server_key = Arc::new(
        tokio::task::spawn_blocking(move || ServerKeyPair::generate(bits))
            .await
            .context("key generation task")??,
    );

    let secret = SharedSecret::new(config.apk_signature.as_str());
    let state = AppState {
        server_key: server_key.clone(),
        secret: secret.clone(),
        enrollment: EnrollmentService::new(
            store.clone(),
            server_key.clone(),
            AttestationVerifier::new(config.attestation_oid.clone()),
            secret.clone(),
            payload,
        ),
        redemption: RedemptionService::new(
            store,
            server_key,
            secret,
            config.redemption_policy(),
        ),
    };
    let app = router(state, config.rate_limiter());

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(
        addr = %config.bind,
        oid = %config.attestation_oid,
        consume_codes = config.consume_codes,
        code_ttl_secs = ?config.code_ttl_secs,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
