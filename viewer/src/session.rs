//! The per-view context and its cooperative frame loop.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{BlockCoords, BlockKey, BlockMatrix, BlockRecord};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{BlockCache, WriteOutcome};
use crate::edit::random_matrix;
use crate::error::{EditError, TransportError};
use crate::input::{InputOutcome, InteractionHandler, PointerEvent};
use crate::reconcile::{reconcile, FetchPurpose, FetchRequest, Reconciler, Route};
use crate::render::{draw_frame, Frame, RenderStats, Surface};
use crate::transport::{BlockApi, LiveChannel, LiveMessage};
use crate::viewport::Viewport;
use crate::visibility;
use crate::ViewerConfig;

/// View-level actions that do not come from the pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCommand {
    Teleport { x: f64, y: f64 },
    CenterOn { x: f64, y: f64 },
    ResetView,
    Select(Option<BlockCoords>),
    BeginEdit,
    /// Replace the block under edit with a random ghost matrix. `None` uses
    /// the configured liveness.
    Randomize { liveness: Option<u32> },
    Commit,
    CancelEdit,
    ShowGrid(bool),
}

#[derive(Debug)]
pub enum SessionEvent {
    Input(PointerEvent),
    Command(ViewCommand),
    Fetched {
        key: BlockKey,
        epoch: u64,
        result: Result<BlockMatrix, TransportError>,
    },
    Committed {
        key: BlockKey,
        result: Result<(), TransportError>,
    },
    Live(LiveMessage),
}

/// Cloneable sender for feeding input and commands into a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Returns false once the session is gone.
    pub fn pointer(&self, event: PointerEvent) -> bool {
        self.events.send(SessionEvent::Input(event)).is_ok()
    }

    pub fn command(&self, command: ViewCommand) -> bool {
        self.events.send(SessionEvent::Command(command)).is_ok()
    }
}

/// Everything that arrives at a session: its own completions plus live
/// messages from the channel.
#[derive(Debug)]
pub struct SessionInbox {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    live: mpsc::UnboundedReceiver<LiveMessage>,
}

impl SessionInbox {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            Some(event) = self.events.recv() => Some(event),
            Some(msg) = self.live.recv() => Some(SessionEvent::Live(msg)),
            else => None,
        }
    }

    /// Next event that is already queued, if any.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events
            .try_recv()
            .ok()
            .or_else(|| self.live.try_recv().ok().map(SessionEvent::Live))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub visible: usize,
    pub cached: usize,
    pub pending: usize,
    pub subscriptions: usize,
    pub edit_lock: Option<BlockKey>,
    pub selected: Option<BlockCoords>,
}

/// State owned by one view for its whole lifetime.
///
/// Every field is touched only from the task driving the session, so none
/// of it needs a lock. Network calls run as spawned tasks and report back
/// through the inbox.
pub struct Session {
    config: ViewerConfig,
    block_size: usize,
    viewport: Viewport,
    cache: BlockCache,
    reconciler: Reconciler,
    input: InteractionHandler,
    selected: Option<BlockCoords>,
    previous: BTreeSet<BlockKey>,
    api: Arc<dyn BlockApi>,
    live: Arc<dyn LiveChannel>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tasks: JoinSet<()>,
    commit_in_flight: Option<BlockKey>,
    frames: u64,
    last_render: RenderStats,
}

impl Session {
    /// Fetch the block size (falling back to the configured default) and
    /// set up the live channel.
    pub async fn start(
        config: ViewerConfig,
        api: Arc<dyn BlockApi>,
        live: Arc<dyn LiveChannel>,
        live_rx: mpsc::UnboundedReceiver<LiveMessage>,
    ) -> (Self, SessionInbox) {
        let block_size = match api.block_size().await {
            Ok(size) if size > 0 => size,
            Ok(size) => {
                warn!(
                    "Server reported block size {}, using default {}",
                    size, config.default_block_size
                );
                config.default_block_size
            }
            Err(e) => {
                warn!(
                    "Failed to fetch block size, using default {}: {}",
                    config.default_block_size, e
                );
                config.default_block_size
            }
        };
        info!("Session {} started with block size {}", config.client_id, block_size);

        let (events, events_rx) = mpsc::unbounded_channel();
        let viewport = Viewport::new(
            config.canvas_width,
            config.canvas_height,
            config.cell_size,
            config.zoom,
        );
        let mut reconciler = Reconciler::new(config.live_mode, config.client_id.clone());
        reconciler.start(live.as_ref());

        let session = Self {
            config,
            block_size,
            viewport,
            cache: BlockCache::new(),
            reconciler,
            input: InteractionHandler::new(),
            selected: None,
            previous: BTreeSet::new(),
            api,
            live,
            events,
            tasks: JoinSet::new(),
            commit_in_flight: None,
            frames: 0,
            last_render: RenderStats::default(),
        };
        let inbox = SessionInbox {
            events: events_rx,
            live: live_rx,
        };
        (session, inbox)
    }

    pub fn controller(&self) -> SessionHandle {
        SessionHandle {
            events: self.events.clone(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn selected(&self) -> Option<BlockCoords> {
        self.selected
    }

    pub fn visible(&self) -> &BTreeSet<BlockKey> {
        &self.previous
    }

    pub fn last_render(&self) -> RenderStats {
        self.last_render
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames: self.frames,
            visible: self.previous.len(),
            cached: self.cache.len(),
            pending: self.cache.pending_count(),
            subscriptions: self.reconciler.subscription_count(),
            edit_lock: self.cache.edit_lock().cloned(),
            selected: self.selected,
        }
    }

    /// One render-loop tick: resolve, reconcile, draw.
    pub fn frame(&mut self, surface: &mut dyn Surface) -> RenderStats {
        while self.tasks.try_join_next().is_some() {}

        let current = visibility::resolve(&self.viewport, self.block_size);
        let mut delta = reconcile(&self.previous, &current);
        let retry: Vec<BlockKey> = self
            .previous
            .intersection(&current)
            .filter(|key| !self.reconciler.is_tracked(key))
            .cloned()
            .collect();
        if !retry.is_empty() {
            debug!("Retrying {} untracked visible blocks", retry.len());
            delta.added.extend(retry);
            delta.added.sort();
        }
        if !delta.is_empty() {
            debug!(
                "Visible set changed: +{} -{} ({} visible)",
                delta.added.len(),
                delta.removed.len(),
                current.len()
            );
            let fetches = self
                .reconciler
                .apply(&delta, &mut self.cache, self.live.as_ref());
            for fetch in fetches {
                self.spawn_fetch(fetch);
            }
        }

        let frame = Frame {
            viewport: &self.viewport,
            cache: &self.cache,
            block_size: self.block_size,
            selected: self.selected,
            style: &self.config.style,
        };
        let stats = draw_frame(surface, &frame, &current);

        self.previous = current;
        self.frames += 1;
        self.last_render = stats;
        stats
    }

    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Input(pointer) => {
                let outcome = self.input.handle(pointer, &mut self.viewport, self.block_size);
                if let InputOutcome::Selected(coords) = outcome {
                    info!("Selected block {}", coords);
                    self.selected = Some(coords);
                }
            }
            SessionEvent::Command(command) => self.command(command),
            SessionEvent::Fetched { key, epoch, result } => self.on_fetched(key, epoch, result),
            SessionEvent::Committed { key, result } => self.on_committed(key, result),
            SessionEvent::Live(msg) => self.on_live(msg),
        }
    }

    fn command(&mut self, command: ViewCommand) {
        let result = match command {
            ViewCommand::Teleport { x, y } => {
                self.viewport.teleport(x, y);
                Ok(())
            }
            ViewCommand::CenterOn { x, y } => {
                self.viewport.center_on(x, y);
                Ok(())
            }
            ViewCommand::ResetView => {
                self.viewport.reset(self.config.cell_size);
                Ok(())
            }
            ViewCommand::Select(selected) => {
                self.selected = selected;
                Ok(())
            }
            ViewCommand::ShowGrid(show) => {
                self.config.style.show_grid = show;
                Ok(())
            }
            ViewCommand::BeginEdit => self.begin_edit().map(drop),
            ViewCommand::Randomize { liveness } => self
                .randomize(liveness.unwrap_or(self.config.default_liveness))
                .map(drop),
            ViewCommand::Commit => self.commit().map(drop),
            ViewCommand::CancelEdit => self.cancel_edit().map(drop),
        };
        if let Err(e) = result {
            warn!("Edit action rejected: {}", e);
        }
    }

    /// Lock the selected block for local editing.
    pub fn begin_edit(&mut self) -> Result<BlockKey, EditError> {
        let key = self.selected_key()?;
        if self.cache.get(&key).is_none() {
            return Err(EditError::NoData(key));
        }
        self.cache
            .lock_for_edit(&key)
            .map_err(EditError::LockedElsewhere)?;
        info!("Editing block {}", key);
        Ok(key)
    }

    fn selected_key(&self) -> Result<BlockKey, EditError> {
        let key = self.selected.ok_or(EditError::NothingSelected)?.key();
        if !self.cache.contains(&key) {
            return Err(EditError::NotVisible(key));
        }
        Ok(key)
    }

    /// Replace the block under edit, or the selection when nothing is
    /// locked, with a random ghost matrix and hold the lock on it.
    pub fn randomize(&mut self, liveness: u32) -> Result<BlockKey, EditError> {
        let key = match self.cache.edit_lock() {
            Some(key) if self.cache.contains(key) => key.clone(),
            Some(key) => return Err(EditError::NotVisible(key.clone())),
            None => self.selected_key()?,
        };
        let matrix = random_matrix(self.block_size, liveness, &mut rand::thread_rng());
        debug!("Randomized block {} ({} alive)", key, matrix.alive_count());
        self.cache.set_authoritative(&key, matrix);
        Ok(key)
    }

    /// Send the block under edit to the server. The lock is released only
    /// once the server acknowledges.
    pub fn commit(&mut self) -> Result<BlockKey, EditError> {
        let key = self.cache.edit_lock().cloned().ok_or(EditError::NotEditing)?;
        if let Some(in_flight) = &self.commit_in_flight {
            return Err(EditError::CommitInFlight(in_flight.clone()));
        }
        let matrix = self
            .cache
            .get(&key)
            .cloned()
            .ok_or_else(|| EditError::NoData(key.clone()))?;

        info!("Committing block {}", key);
        self.commit_in_flight = Some(key.clone());
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let task_key = key.clone();
        self.tasks.spawn(async move {
            let result = api.commit_block(task_key.coords(), matrix).await;
            let _ = events.send(SessionEvent::Committed {
                key: task_key,
                result,
            });
        });
        Ok(key)
    }

    /// Drop the local edit and reload the block from the server.
    pub fn cancel_edit(&mut self) -> Result<BlockKey, EditError> {
        let key = self.cache.unlock().ok_or(EditError::NotEditing)?;
        if let Some(fetch) = self.reconciler.refetch(&key) {
            self.spawn_fetch(fetch);
        }
        info!("Abandoned edit of block {}", key);
        Ok(key)
    }

    fn on_fetched(&mut self, key: BlockKey, epoch: u64, result: Result<BlockMatrix, TransportError>) {
        if !self.reconciler.accepts(&key, epoch) {
            debug!("Dropping stale fetch for block {}", key);
            return;
        }
        match result {
            Ok(matrix) => self.store(&key, matrix, None),
            Err(e) => warn!("Failed to load block {}: {}", key, e),
        }
    }

    fn on_committed(&mut self, key: BlockKey, result: Result<(), TransportError>) {
        if self.commit_in_flight.as_ref() == Some(&key) {
            self.commit_in_flight = None;
        }
        match result {
            Ok(()) => {
                if self.cache.is_locked(&key) {
                    self.cache.unlock();
                }
                info!("Committed block {}", key);
            }
            Err(e) => warn!("Commit of block {} failed, keeping the edit: {}", key, e),
        }
    }

    fn on_live(&mut self, msg: LiveMessage) {
        match self.reconciler.route(msg.subscription) {
            None => debug!("Ignoring message on inactive {}", msg.subscription),
            Some(Route::Block(key)) => match serde_json::from_str::<BlockMatrix>(&msg.body) {
                Ok(matrix) => self.store(&key, matrix, None),
                Err(e) => warn!("Malformed push for block {}: {}", key, e),
            },
            Some(Route::FanIn) => match serde_json::from_str::<Vec<BlockRecord>>(&msg.body) {
                Ok(records) => {
                    for record in records {
                        let key = record.coords().key();
                        if !self.reconciler.is_tracked(&key) {
                            debug!("Ignoring record for untracked block {}", key);
                            continue;
                        }
                        self.store(&key, record.cells, Some(record.generation));
                    }
                }
                Err(e) => warn!("Malformed fan-in message: {}", e),
            },
        }
    }

    fn store(&mut self, key: &BlockKey, matrix: BlockMatrix, generation: Option<u64>) {
        if let Err(e) = matrix.validate(self.block_size) {
            warn!("Discarding block {}: {}", key, e);
            return;
        }
        let outcome = match generation {
            Some(generation) => self.cache.set_generation(key, matrix, generation),
            None => self.cache.set(key, matrix),
        };
        if outcome != WriteOutcome::Applied {
            debug!("Write to block {} dropped: {:?}", key, outcome);
        }
    }

    fn spawn_fetch(&mut self, fetch: FetchRequest) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = api.fetch_block(fetch.key.coords(), fetch.is_updating()).await;
            let FetchRequest { key, purpose } = fetch;
            match purpose {
                FetchPurpose::Initial { epoch } => {
                    let _ = events.send(SessionEvent::Fetched { key, epoch, result });
                }
                FetchPurpose::Release => {
                    if let Err(e) = result {
                        debug!("Release notice for block {} failed: {}", key, e);
                    }
                }
            }
        });
    }

    /// Release every subscription and abort outstanding network tasks.
    pub fn teardown(&mut self) {
        self.reconciler.release_all(&mut self.cache, self.live.as_ref());
        self.cache.clear();
        self.previous.clear();
        self.tasks.abort_all();
        info!("Session {} torn down after {} frames", self.config.client_id, self.frames);
    }

    /// Drive the session until `shutdown` resolves: one frame per tick of
    /// the configured frame rate, events handled in between. Tears the
    /// session down before returning.
    pub async fn run<F>(
        mut self,
        mut inbox: SessionInbox,
        surface: &mut dyn Surface,
        shutdown: F,
    ) -> SessionStats
    where
        F: Future<Output = ()>,
    {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.frame_rate.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.frame(surface);
                }
                Some(event) = inbox.recv() => self.handle(event),
            }
        }

        drop(ticker);
        let stats = self.stats();
        self.teardown();
        stats
    }
}
