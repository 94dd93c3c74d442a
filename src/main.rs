use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use pdfqa::core::config::{AppPaths, Settings};
use pdfqa::core::logging;
use pdfqa::server::router::router;
use pdfqa::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init_proxy(&paths);

    let settings = Settings::from_env();
    let state = AppState::new(paths, settings);

    // An unusable tool server at boot is unrecoverable: exit non-zero.
    state
        .tool_server
        .start()
        .await
        .context("tool server failed to start")?;

    let port = env::var("PDFQA_PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(8000);
    let bind_addr = format!("0.0.0.0:{port}");

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let app = router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.tool_server.shutdown().await;
    tracing::info!("proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
