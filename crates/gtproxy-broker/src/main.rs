//! gtproxy broker endpoint.
//!
//! - Extension WebSocket: /v1/ext?name=...
//! - Ops: /healthz, /readyz, /metrics
//! - Config from `$GTPROXY_CONFIG` (default `gtproxy.yaml`)

use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use gtproxy_broker::{app_state, config, router};
use gtproxy_core::error::{ProxyError, Result};

const SWEEP_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("GTPROXY_CONFIG").unwrap_or_else(|_| "gtproxy.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .broker
        .listen
        .parse()
        .map_err(|e| ProxyError::BadRequest(format!("broker.listen must be a SocketAddr: {e}")))?;

    let (state, mut injected) = app_state::AppState::new(cfg);

    // No game transport is attached here; injected packets are only logged.
    tokio::spawn(async move {
        while let Some(p) = injected.recv().await {
            tracing::info!(
                packet_id = p.packet_id,
                direction = p.direction.as_str(),
                len = p.bytes.len(),
                "injected packet"
            );
        }
    });

    let broker = std::sync::Arc::clone(state.broker());
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_EVERY);
        loop {
            tick.tick().await;
            broker.sweep_expired();
        }
    });

    let draining = state.clone();
    let app = router::build_router(state);

    tracing::info!(%listen, config = %path, "gtproxy-broker starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ProxyError::Internal(format!("bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            draining.set_draining();
            tracing::info!("shutdown requested, draining");
        })
        .await
        .map_err(|e| ProxyError::Internal(format!("server failed: {e}")))
}
