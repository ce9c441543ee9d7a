use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use url::Url;
use viewer::{LiveMode, RenderStyle, ViewerConfig, ZoomBounds};

pub struct Config {
    pub gen_api_url: String,
    pub ws_url: Url,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub cell_size: f64,
    pub min_cell_size: f64,
    pub max_cell_size: f64,
    pub frame_rate: u32,
    pub default_block_size: usize,
    pub live_mode: LiveMode,
    pub show_grid: bool,
    pub status_poll_secs: u64,
    pub snapshot_path: Option<PathBuf>,
    pub client_id: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            gen_api_url: std::env::var("GEN_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            ws_url: ws_url(
                std::env::var("WS_URL").as_deref().unwrap_or("ws://localhost:8080/ws"),
            )?,
            canvas_width: parsed("CANVAS_WIDTH", 1200)?,
            canvas_height: parsed("CANVAS_HEIGHT", 600)?,
            cell_size: parsed("CELL_SIZE", 10.0)?,
            min_cell_size: parsed("MIN_CELL_SIZE", 2.0)?,
            max_cell_size: parsed("MAX_CELL_SIZE", 50.0)?,
            frame_rate: parsed("FRAME_RATE", 30)?,
            default_block_size: parsed("DEFAULT_BLOCK_SIZE", common::block::DEFAULT_BLOCK_SIZE)?,
            live_mode: match std::env::var("LIVE_MODE") {
                Ok(v) => v.parse().map_err(anyhow::Error::msg)?,
                Err(_) => LiveMode::PerBlock,
            },
            show_grid: parsed("SHOW_GRID", true)?,
            status_poll_secs: parsed("STATUS_POLL_SECS", 1)?,
            snapshot_path: std::env::var_os("SNAPSHOT_PATH").map(PathBuf::from),
            client_id: uuid::Uuid::new_v4().to_string(),
        };
        anyhow::ensure!(
            config.min_cell_size > 0.0 && config.min_cell_size <= config.max_cell_size,
            "MIN_CELL_SIZE must be positive and not above MAX_CELL_SIZE"
        );
        anyhow::ensure!(config.default_block_size > 0, "DEFAULT_BLOCK_SIZE must be positive");
        Ok(config)
    }

    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            canvas_width: self.canvas_width as f64,
            canvas_height: self.canvas_height as f64,
            cell_size: self.cell_size,
            zoom: ZoomBounds {
                min_cell_size: self.min_cell_size,
                max_cell_size: self.max_cell_size,
            },
            default_block_size: self.default_block_size,
            frame_rate: self.frame_rate,
            live_mode: self.live_mode,
            client_id: self.client_id.clone(),
            style: RenderStyle {
                show_grid: self.show_grid,
                ..RenderStyle::default()
            },
            ..ViewerConfig::default()
        }
    }
}

/// Parse `WS_URL`, accepting only WebSocket URLs with a host.
fn ws_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid WS_URL={raw:?}"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "ws" | "wss") && url.host_str().is_some(),
        "WS_URL must be a ws:// or wss:// URL with a host, got {raw:?}"
    );
    Ok(url)
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid {name}={raw:?}")),
        Err(_) => Ok(default),
    }
}
