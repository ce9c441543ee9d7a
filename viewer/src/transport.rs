//! Seams to the network collaborators.
//!
//! The HTTP side is an async request/response API. The live side is a
//! command queue: subscribe, unsubscribe and publish return immediately,
//! and inbound messages arrive later as [`LiveMessage`]s on a channel the
//! implementation was built with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::{BlockCoords, BlockMatrix, StateInfo};
use tokio::sync::mpsc;

use crate::error::TransportError;

#[async_trait]
pub trait BlockApi: Send + Sync {
    /// Cells per block side for this session.
    async fn block_size(&self) -> Result<usize, TransportError>;

    /// Fetch a block's state. `is_updating` tells the server whether to keep
    /// simulating the block.
    async fn fetch_block(
        &self,
        coords: BlockCoords,
        is_updating: bool,
    ) -> Result<BlockMatrix, TransportError>;

    /// Commit a locally authored matrix.
    async fn commit_block(
        &self,
        coords: BlockCoords,
        matrix: BlockMatrix,
    ) -> Result<(), TransportError>;

    async fn state_info(&self) -> Result<StateInfo, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A message pushed by the server on one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMessage {
    pub subscription: SubscriptionId,
    pub body: String,
}

pub trait LiveChannel: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<SubscriptionId, TransportError>;
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
    fn publish(&self, destination: &str, body: String) -> Result<(), TransportError>;
}

/// In-process live channel. Records every command and lets the caller push
/// messages to whoever subscribed to a topic.
#[derive(Debug)]
pub struct MemoryLive {
    next_id: AtomicU64,
    inner: parking_lot::Mutex<MemoryLiveState>,
    sink: mpsc::UnboundedSender<LiveMessage>,
}

#[derive(Debug, Default)]
struct MemoryLiveState {
    active: HashMap<SubscriptionId, String>,
    refused: usize,
    subscribe_log: Vec<String>,
    unsubscribe_log: Vec<String>,
    published: Vec<(String, String)>,
}

impl MemoryLive {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiveMessage>) {
        let (sink, rx) = mpsc::unbounded_channel();
        let live = Self {
            next_id: AtomicU64::new(1),
            inner: parking_lot::Mutex::new(MemoryLiveState::default()),
            sink,
        };
        (live, rx)
    }

    /// Deliver `body` to every active subscription on `topic`. Returns how
    /// many subscriptions received it.
    pub fn push(&self, topic: &str, body: impl Into<String>) -> usize {
        let body = body.into();
        let guard = self.inner.lock();
        let mut delivered = 0;
        for (id, t) in &guard.active {
            if t == topic {
                let _ = self.sink.send(LiveMessage {
                    subscription: *id,
                    body: body.clone(),
                });
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver a message on a subscription id whether or not it is active,
    /// the way a message already in flight can outlive its unsubscribe.
    pub fn push_raw(&self, subscription: SubscriptionId, body: impl Into<String>) {
        let _ = self.sink.send(LiveMessage {
            subscription,
            body: body.into(),
        });
    }

    /// Fail the next `count` subscribes the way a dropped connection would.
    pub fn refuse_subscribes(&self, count: usize) {
        self.inner.lock().refused = count;
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.lock().active.values().cloned().collect();
        topics.sort();
        topics
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.inner.lock().subscribe_log.iter().filter(|t| *t == topic).count()
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.inner.lock().unsubscribe_log.iter().filter(|t| *t == topic).count()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().published.clone()
    }
}

impl LiveChannel for MemoryLive {
    fn subscribe(&self, topic: &str) -> Result<SubscriptionId, TransportError> {
        let mut guard = self.inner.lock();
        if guard.refused > 0 {
            guard.refused -= 1;
            return Err(TransportError::Closed);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        guard.active.insert(id, topic.to_string());
        guard.subscribe_log.push(topic.to_string());
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        let mut guard = self.inner.lock();
        if let Some(topic) = guard.active.remove(&id) {
            guard.unsubscribe_log.push(topic);
        }
        Ok(())
    }

    fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.inner.lock().published.push((destination.to_string(), body));
        Ok(())
    }
}
