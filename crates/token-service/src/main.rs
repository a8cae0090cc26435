//! Token service
//!
//! Issues media and bus access tokens and serves the account directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use token_service::config::Config;
use token_service::crypto::SigningKey;
use token_service::observability::metrics::init_metrics_recorder;
use token_service::repositories::{AccountStore, InMemoryAccountStore};
use token_service::routes::{self, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "token_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting token service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        token_ttl_seconds = config.token_ttl_seconds,
        signing_key_id = %config.signing_key_id,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let signing_key = match &config.signing_key {
        Some(encoded) => {
            use common::secret::ExposeSecret;
            SigningKey::from_pkcs8_base64(config.signing_key_id.clone(), encoded.expose_secret())?
        }
        None => {
            warn!("TOKEN_SIGNING_KEY not set, generating an ephemeral signing key");
            SigningKey::generate(config.signing_key_id.clone())?
        }
    };

    let accounts: Arc<dyn AccountStore> = match &config.directory_seed_file {
        Some(path) => Arc::new(InMemoryAccountStore::load_seed_file(Path::new(path)).await?),
        None => {
            warn!("DIRECTORY_SEED_FILE not set, directory is empty");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    let clock_skew = Duration::from_secs(config.jwt_clock_skew_seconds.unsigned_abs());
    let state = Arc::new(AppState::new(
        Arc::new(signing_key),
        accounts,
        config.token_ttl_seconds,
        clock_skew,
    ));

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Token service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Token service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
