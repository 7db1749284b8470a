use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamrec_config::StreamRecConfig;
use streamrec_gateway::GatewayState;

use crate::app::App;

/// Run the scheduler engine and the HTTP gateway until Ctrl-C.
pub async fn run_serve(config: StreamRecConfig, port: Option<u16>, dry_run: bool) -> Result<()> {
    let app = App::build(&config, dry_run)?;
    let shutdown = CancellationToken::new();

    let engine_task = tokio::spawn(app.engine.clone().run(shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    let state = Arc::new(GatewayState {
        store: app.store.clone(),
        engine: app.engine.clone(),
        badge: app.badge.clone(),
        clock: app.clock.clone(),
        auth_token: config.gateway.auth_token.clone(),
    });
    let port = port.unwrap_or(config.gateway.port);
    let served = streamrec_gateway::start_gateway(state, &config.gateway.host, port, shutdown.clone())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"));

    // The engine finishes its current tick before exiting.
    shutdown.cancel();
    engine_task.await?;

    // Let a capture the engine owns finish its file instead of being killed.
    match app.engine.snapshot().await {
        Ok(snapshot) if snapshot.run_state.owns_recording => {
            if let Err(e) = app.engine.stop_recording().await {
                warn!("Failed to stop recording on shutdown: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to read engine state on shutdown: {e}"),
    }

    served
}
