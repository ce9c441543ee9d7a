use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use viewer::BlockApi;

/// Poll the server's runner statistics and log them when they change.
pub async fn run(api: Arc<dyn BlockApi>, every: Duration) {
    tracing::info!("Status poller started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = None;

    loop {
        ticker.tick().await;
        match api.state_info().await {
            Ok(info) if last != Some(info) => {
                tracing::info!(
                    "Server holds {} blocks, {} updating",
                    info.blocks_in_memory,
                    info.blocks_updating
                );
                last = Some(info);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("State info unavailable: {}", e),
        }
    }
}
