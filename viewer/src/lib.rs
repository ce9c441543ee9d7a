//! Viewport-driven block subscription, caching and rendering for an
//! infinite cellular grid.
//!
//! A [`Session`] owns everything that lives as long as one view: the
//! [`Viewport`], the [`BlockCache`], the subscription [`Reconciler`] and the
//! pointer state machine. It is driven from a single task, either by calling
//! [`Session::frame`] and [`Session::handle`] directly or through
//! [`Session::run`].

pub mod cache;
pub mod edit;
pub mod error;
pub mod input;
pub mod raster;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod transport;
pub mod viewport;
pub mod visibility;

pub use cache::{BlockCache, CacheEntry, WriteOutcome};
pub use error::{EditError, TransportError};
pub use input::{InputOutcome, InteractionHandler, PointerButton, PointerEvent, PointerKind};
pub use raster::Framebuffer;
pub use reconcile::{reconcile, Delta, LiveMode, Reconciler};
pub use render::{Rect, RenderStyle, Surface};
pub use session::{Session, SessionEvent, SessionHandle, SessionInbox, SessionStats, ViewCommand};
pub use transport::{BlockApi, LiveChannel, LiveMessage, MemoryLive, SubscriptionId};
pub use viewport::{BlockRange, Viewport, ZoomBounds};

use common::block::DEFAULT_BLOCK_SIZE;

/// Settings for one view. Everything here is fixed for the session's lifetime.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub canvas_width: f64,
    pub canvas_height: f64,
    /// Initial pixels per cell.
    pub cell_size: f64,
    pub zoom: ZoomBounds,
    /// Used when the server's block size cannot be fetched.
    pub default_block_size: usize,
    pub frame_rate: u32,
    pub live_mode: LiveMode,
    pub client_id: String,
    pub style: RenderStyle,
    /// One in `liveness` cells comes out alive when randomizing a block.
    pub default_liveness: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1200.0,
            canvas_height: 600.0,
            cell_size: 10.0,
            zoom: ZoomBounds::default(),
            default_block_size: DEFAULT_BLOCK_SIZE,
            frame_rate: 30,
            live_mode: LiveMode::PerBlock,
            client_id: "viewer".into(),
            style: RenderStyle::default(),
            default_liveness: 5,
        }
    }
}
