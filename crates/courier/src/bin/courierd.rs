//! `courierd`: the Courier server process.
//!
//! Reads its configuration from the environment (see
//! [`ServerConfig::from_env`]), serves until SIGINT or SIGTERM, then ends
//! every live stream and exits.

use std::sync::Arc;

use courier::prelude::*;

#[tokio::main]
async fn main() -> Result<(), CourierError> {
    courier::logging::init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "starting courierd");

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let signer = JwtSigner::new(config.secret_key.as_bytes()).map_err(AuthError::from)?;
    let kdf = Pbkdf2Kdf::new(config.kdf);

    let server = CourierServer::builder()
        .config(config)
        .build(store, signer, kdf)
        .await?;
    server.run_until_shutdown(shutdown_signal()).await
}

/// Completes on Ctrl-C, or on SIGTERM where there is one.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
