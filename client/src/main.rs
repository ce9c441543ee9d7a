mod api;
mod commands;
mod config;
mod status;
mod stomp;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;
use viewer::{BlockApi, Framebuffer, Session};

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT, shutting down...");
                return;
            }
        };
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("client=info".parse()?)
                .add_directive("viewer=info".parse()?),
        )
        .init();

    let config = config::Config::from_env()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));
    // A pending stdin read would otherwise hold shutdown until the next line.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    tracing::info!(
        "Starting client {} against {} ({:?})",
        config.client_id,
        config.gen_api_url,
        config.live_mode
    );

    let api: Arc<dyn BlockApi> = Arc::new(api::HttpBlockApi::new(config.gen_api_url.as_str()));
    let (live, live_rx, live_task) = ws::StompLive::spawn(config.ws_url.clone());
    let live = Arc::new(live);

    let (session, inbox) =
        Session::start(config.viewer_config(), api.clone(), live.clone(), live_rx).await;

    let poller = tokio::spawn(status::run(
        api.clone(),
        Duration::from_secs(config.status_poll_secs.max(1)),
    ));
    let (quit_tx, quit_rx) = oneshot::channel();
    let input = tokio::spawn(commands::read_stdin(session.controller(), quit_tx));

    let mut surface = Framebuffer::new(config.canvas_width, config.canvas_height);
    let stats = session
        .run(inbox, &mut surface, async {
            tokio::select! {
                _ = shutdown_signal() => {},
                Ok(()) = quit_rx => tracing::info!("Quit requested, shutting down..."),
            }
        })
        .await;

    poller.abort();
    input.abort();
    tracing::info!(
        "Session ended after {} frames with {} blocks cached",
        stats.frames,
        stats.cached
    );

    // The connection task drains queued unsubscribes, then disconnects.
    drop(live);
    if tokio::time::timeout(Duration::from_secs(1), live_task).await.is_err() {
        tracing::warn!("Live channel did not close in time");
    }

    if let Some(path) = &config.snapshot_path {
        surface
            .write_png(path)
            .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
        tracing::info!("Wrote last frame to {}", path.display());
    }

    tracing::info!("Client stopped.");
    Ok(())
}
