//! relayrpc gateway
//!
//! - WebSocket endpoint: /v1/ws (one engine per connection)
//! - Health check: /healthz
//! - Built-in methods: ping, echo

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use relayrpc_engine::{app_state, config, router, BoxError};

const DEFAULT_CONFIG: &str = "relayrpc.yaml";

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| format!("gateway.listen must be a valid SocketAddr: {e}"))?;

    let state = app_state::AppState::new(cfg);
    let shutdown = state.shutdown_token().clone();
    let app = router::build_router(state);

    tracing::info!(%listen, config = %path, "relayrpc-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
