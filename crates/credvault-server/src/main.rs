//! `CredVault` server entry point.
//!
//! Bootstraps the storage backend, audit trail and vault, then starts the
//! Axum HTTP server with graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use credvault_core::audit::AuditManager;
use credvault_core::audit_file::FileAuditBackend;
use credvault_core::{Vault, VaultConfig};
use credvault_storage::MemoryBackend;

use credvault_server::build_router;
use credvault_server::config::{ServerConfig, StorageBackendType};
use credvault_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment.
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        delete_policy = %config.delete_policy,
        "CredVault starting"
    );

    let state = build_app_state(&config).await?;

    let app = build_router(Arc::clone(&state));

    // Bind and serve.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "CredVault server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("CredVault server stopped");
    Ok(())
}

/// Open storage, register audit backends and assemble the vault.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    // Bootstrap storage backend.
    let storage: Arc<dyn credvault_storage::StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(
                credvault_storage::RocksDbBackend::open(path)
                    .context("failed to open RocksDB storage")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            Arc::new(
                credvault_storage::RedbBackend::open(path)
                    .context("failed to open redb storage")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            Arc::new(
                credvault_storage::PostgresBackend::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!(
                "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
            );
        }
    };

    let audit_manager = Arc::new(AuditManager::new());

    // Register file audit backend if configured.
    if let Some(ref audit_path) = config.audit_file_path {
        let file_backend = Arc::new(FileAuditBackend::new(audit_path));
        audit_manager.add_backend(file_backend).await;
        info!(path = %audit_path, "file audit backend registered");
    } else {
        warn!("no audit backend configured, mutations will not be recorded");
    }

    if config.superusers.is_empty() {
        warn!("CREDVAULT_SUPERUSERS is empty, nothing but the bootstrap account can be created");
    }

    let vault = Arc::new(Vault::new(
        storage,
        audit_manager,
        VaultConfig {
            delete_policy: config.delete_policy,
        },
    ));

    Ok(Arc::new(AppState::new(vault, config.superusers.clone())))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
