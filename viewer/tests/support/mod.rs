#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{BlockCoords, BlockMatrix, Cell, StateInfo};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use viewer::{
    BlockApi, Framebuffer, MemoryLive, Session, SessionInbox, TransportError, ViewerConfig,
};

/// Block whose alive cells form a checkerboard offset by the block's x.
pub fn pattern(size: usize, coords: BlockCoords) -> BlockMatrix {
    BlockMatrix::from_fn(size, |x, y| {
        Cell::Alive((x + y + coords.x.rem_euclid(2) as usize) % 2 == 0)
    })
}

#[derive(Default)]
struct Calls {
    fetches: Vec<(BlockCoords, bool)>,
    commits: Vec<(BlockCoords, BlockMatrix)>,
}

/// Scripted HTTP API that records every call.
pub struct FakeApi {
    pub size: Result<usize, TransportError>,
    pub fail_commits: bool,
    pub fail_fetches: bool,
    gate: Option<Semaphore>,
    calls: Mutex<Calls>,
}

impl FakeApi {
    pub fn new(size: usize) -> Self {
        Self {
            size: Ok(size),
            fail_commits: false,
            fail_fetches: false,
            gate: None,
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Fetches block until [`release`](Self::release) hands out permits.
    pub fn gated(size: usize) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(size)
        }
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    pub fn fetches(&self) -> Vec<(BlockCoords, bool)> {
        self.calls.lock().fetches.clone()
    }

    pub fn commits(&self) -> Vec<(BlockCoords, BlockMatrix)> {
        self.calls.lock().commits.clone()
    }

    fn block_side(&self) -> usize {
        *self.size.as_ref().unwrap_or(&10)
    }
}

#[async_trait]
impl BlockApi for FakeApi {
    async fn block_size(&self) -> Result<usize, TransportError> {
        self.size.clone()
    }

    async fn fetch_block(
        &self,
        coords: BlockCoords,
        is_updating: bool,
    ) -> Result<BlockMatrix, TransportError> {
        self.calls.lock().fetches.push((coords, is_updating));
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        if self.fail_fetches {
            return Err(TransportError::Status(500));
        }
        Ok(pattern(self.block_side(), coords))
    }

    async fn commit_block(
        &self,
        coords: BlockCoords,
        matrix: BlockMatrix,
    ) -> Result<(), TransportError> {
        self.calls.lock().commits.push((coords, matrix));
        if self.fail_commits {
            return Err(TransportError::Request("connection reset".into()));
        }
        Ok(())
    }

    async fn state_info(&self) -> Result<StateInfo, TransportError> {
        Ok(StateInfo::default())
    }
}

pub struct Harness {
    pub session: Session,
    pub inbox: SessionInbox,
    pub api: Arc<FakeApi>,
    pub live: Arc<MemoryLive>,
    pub surface: Framebuffer,
}

impl Harness {
    pub async fn start(config: ViewerConfig, api: FakeApi) -> Self {
        let surface = Framebuffer::new(config.canvas_width as u32, config.canvas_height as u32);
        let api = Arc::new(api);
        let (live, live_rx) = MemoryLive::new();
        let live = Arc::new(live);
        let (session, inbox) = Session::start(config, api.clone(), live.clone(), live_rx).await;
        Self {
            session,
            inbox,
            api,
            live,
            surface,
        }
    }

    pub fn frame(&mut self) -> viewer::render::RenderStats {
        self.session.frame(&mut self.surface)
    }

    /// Hand every event that arrives within a short quiet period to the
    /// session.
    pub async fn settle(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.inbox.recv()).await
        {
            self.session.handle(event);
            handled += 1;
        }
        handled
    }
}

/// A 40x20 canvas at 10px per cell over 2x2 blocks: blocks (0,0) and (1,0).
pub fn small_config() -> ViewerConfig {
    ViewerConfig {
        canvas_width: 40.0,
        canvas_height: 20.0,
        cell_size: 10.0,
        client_id: "test-client".into(),
        ..ViewerConfig::default()
    }
}
