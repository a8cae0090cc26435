//! Signaling service
//!
//! Runs the messaging bus hub behind a WebSocket gateway.

use common::jwt::AccessTokenVerifier;
use signaling_service::bus::BusActorHandle;
use signaling_service::config::Config;
use signaling_service::observability::metrics::init_metrics_recorder;
use signaling_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting signaling service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        connect_policy = ?config.connect_policy,
        token_key_id = ?config.token_key_id,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let clock_skew = Duration::from_secs(config.jwt_clock_skew_seconds.unsigned_abs());
    let mut verifier = AccessTokenVerifier::from_public_key(&config.token_public_key, clock_skew);
    if let Some(key_id) = &config.token_key_id {
        verifier = verifier.with_key_id(key_id.clone());
    }

    let bus = BusActorHandle::new(verifier, config.connect_policy);
    let state = Arc::new(AppState { bus: bus.clone() });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Signaling service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(bus.clone()))
    .await?;

    info!("Signaling service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT), then closes the hub so
/// open sockets receive `closed` and drain.
async fn shutdown_signal(bus: BusActorHandle) {
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

    bus.cancel();
}
