//! Diffing visible sets and keeping the subscription table in step.

use std::collections::{BTreeSet, HashMap};

use common::routes::{block_topic, client_topic, UPDATE_REQUESTED_BLOCKS};
use common::{BlockKey, UpdateBlocks};
use tracing::{debug, warn};

use crate::cache::BlockCache;
use crate::transport::{LiveChannel, SubscriptionId};

/// Keys that entered and left view between two ticks, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<BlockKey>,
    pub removed: Vec<BlockKey>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Set difference in both directions.
pub fn reconcile(previous: &BTreeSet<BlockKey>, current: &BTreeSet<BlockKey>) -> Delta {
    Delta {
        added: current.difference(previous).cloned().collect(),
        removed: previous.difference(current).cloned().collect(),
    }
}

/// How live updates reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveMode {
    /// One topic per block.
    #[default]
    PerBlock,
    /// One topic per client carrying records for every requested block.
    FanIn,
}

impl std::str::FromStr for LiveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-block" => Ok(LiveMode::PerBlock),
            "fan-in" => Ok(LiveMode::FanIn),
            other => Err(format!("unknown live mode {other:?}")),
        }
    }
}

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// Initial state for a block entering view. Only a response whose epoch
    /// still matches the key's tracking epoch may be cached.
    Initial { epoch: u64 },
    /// Final notification for a block leaving view. The response is never
    /// cached.
    Release,
}

/// A state fetch the caller should issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: BlockKey,
    pub purpose: FetchPurpose,
}

impl FetchRequest {
    pub fn is_updating(&self) -> bool {
        matches!(self.purpose, FetchPurpose::Initial { .. })
    }
}

/// Where an inbound live message belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Block(BlockKey),
    FanIn,
}

#[derive(Debug)]
struct Tracked {
    epoch: u64,
    subscription: Option<SubscriptionId>,
}

/// The live subscription table.
///
/// The table, not the caller's visible sets, decides what is subscribed:
/// adding a tracked key or removing an untracked one does nothing, which is
/// what makes back-to-back deltas from pan jitter safe to apply.
#[derive(Debug)]
pub struct Reconciler {
    mode: LiveMode,
    client_id: String,
    tracked: HashMap<BlockKey, Tracked>,
    routes: HashMap<SubscriptionId, BlockKey>,
    fan_in: Option<SubscriptionId>,
    next_epoch: u64,
}

impl Reconciler {
    pub fn new(mode: LiveMode, client_id: impl Into<String>) -> Self {
        Self {
            mode,
            client_id: client_id.into(),
            tracked: HashMap::new(),
            routes: HashMap::new(),
            fan_in: None,
            next_epoch: 1,
        }
    }

    pub fn mode(&self) -> LiveMode {
        self.mode
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Subscribe the client's fan-in topic. No-op in per-block mode or when
    /// already subscribed.
    pub fn start(&mut self, live: &dyn LiveChannel) {
        if self.mode != LiveMode::FanIn || self.fan_in.is_some() {
            return;
        }
        let topic = client_topic(&self.client_id);
        match live.subscribe(&topic) {
            Ok(id) => {
                debug!("Subscribed fan-in topic {} as {}", topic, id);
                self.fan_in = Some(id);
            }
            Err(e) => warn!("Failed to subscribe {}: {}", topic, e),
        }
    }

    pub fn is_tracked(&self, key: &BlockKey) -> bool {
        self.tracked.contains_key(key)
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.routes.len() + usize::from(self.fan_in.is_some())
    }

    /// Whether a response to an initial fetch for `key` is still current.
    pub fn accepts(&self, key: &BlockKey, epoch: u64) -> bool {
        self.tracked.get(key).is_some_and(|t| t.epoch == epoch)
    }

    pub fn route(&self, id: SubscriptionId) -> Option<Route> {
        if self.fan_in == Some(id) {
            return Some(Route::FanIn);
        }
        self.routes.get(&id).cloned().map(Route::Block)
    }

    /// A fresh initial fetch for a tracked key, e.g. after an edit is
    /// abandoned.
    pub fn refetch(&self, key: &BlockKey) -> Option<FetchRequest> {
        self.tracked.get(key).map(|t| FetchRequest {
            key: key.clone(),
            purpose: FetchPurpose::Initial { epoch: t.epoch },
        })
    }

    /// Apply a delta: track and subscribe added keys, unsubscribe and evict
    /// removed ones, and send one batched notification for whatever actually
    /// changed. An added key whose subscribe fails stays untracked. Returns
    /// the fetches to issue.
    pub fn apply(
        &mut self,
        delta: &Delta,
        cache: &mut BlockCache,
        live: &dyn LiveChannel,
    ) -> Vec<FetchRequest> {
        let mut fetches = Vec::with_capacity(delta.added.len() + delta.removed.len());
        let mut notice = UpdateBlocks {
            client: self.client_id.clone(),
            blocks_to_remove: Vec::new(),
            blocks_to_add: Vec::new(),
        };

        for key in &delta.removed {
            if !self.release(key, cache, live) {
                continue;
            }
            fetches.push(FetchRequest {
                key: key.clone(),
                purpose: FetchPurpose::Release,
            });
            notice.blocks_to_remove.push(key.clone());
        }

        for key in &delta.added {
            if self.tracked.contains_key(key) {
                continue;
            }
            let subscription = match self.mode {
                LiveMode::PerBlock => {
                    let topic = block_topic(key.coords());
                    match live.subscribe(&topic) {
                        Ok(id) => {
                            self.routes.insert(id, key.clone());
                            Some(id)
                        }
                        Err(e) => {
                            // Left untracked so the next delta tries again.
                            warn!("Failed to subscribe {}: {}", topic, e);
                            continue;
                        }
                    }
                }
                LiveMode::FanIn => None,
            };
            let epoch = self.next_epoch;
            self.next_epoch += 1;
            self.tracked.insert(key.clone(), Tracked { epoch, subscription });
            cache.track(key.clone());
            fetches.push(FetchRequest {
                key: key.clone(),
                purpose: FetchPurpose::Initial { epoch },
            });
            notice.blocks_to_add.push(key.clone());
        }

        self.notify(live, &notice);
        fetches
    }

    /// Release every tracked block and the fan-in topic, sending one final
    /// notification. Used at teardown.
    pub fn release_all(&mut self, cache: &mut BlockCache, live: &dyn LiveChannel) {
        let mut keys: Vec<BlockKey> = self.tracked.keys().cloned().collect();
        keys.sort();
        for key in &keys {
            self.release(key, cache, live);
        }
        if let Some(id) = self.fan_in.take() {
            if let Err(e) = live.unsubscribe(id) {
                warn!("Failed to unsubscribe fan-in topic: {}", e);
            }
        }
        self.notify(
            live,
            &UpdateBlocks {
                client: self.client_id.clone(),
                blocks_to_remove: keys,
                blocks_to_add: Vec::new(),
            },
        );
    }

    fn release(&mut self, key: &BlockKey, cache: &mut BlockCache, live: &dyn LiveChannel) -> bool {
        let Some(tracked) = self.tracked.remove(key) else {
            return false;
        };
        if let Some(id) = tracked.subscription {
            self.routes.remove(&id);
            if let Err(e) = live.unsubscribe(id) {
                warn!("Failed to unsubscribe block {}: {}", key, e);
            }
        }
        cache.evict(key);
        true
    }

    fn notify(&self, live: &dyn LiveChannel, notice: &UpdateBlocks) {
        if notice.is_empty() {
            return;
        }
        let body = match serde_json::to_string(notice) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode block delta: {}", e);
                return;
            }
        };
        debug!(
            "Requesting {} blocks, dropping {}",
            notice.blocks_to_add.len(),
            notice.blocks_to_remove.len()
        );
        if let Err(e) = live.publish(UPDATE_REQUESTED_BLOCKS, body) {
            warn!("Failed to send block delta: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryLive;

    fn set(keys: &[(i64, i64)]) -> BTreeSet<BlockKey> {
        keys.iter().map(|&(x, y)| BlockKey::new(x, y)).collect()
    }

    fn keys_of(cache: &BlockCache) -> BTreeSet<BlockKey> {
        cache.keys().cloned().collect()
    }

    #[test]
    fn reconcile_is_a_two_way_difference() {
        let a = set(&[(0, 0), (1, 0), (2, 0)]);
        let b = set(&[(1, 0), (2, 0), (3, 0)]);
        let delta = reconcile(&a, &b);
        assert_eq!(delta.added, vec![BlockKey::new(3, 0)]);
        assert_eq!(delta.removed, vec![BlockKey::new(0, 0)]);
        assert!(reconcile(&b, &b).is_empty());
    }

    #[test]
    fn applying_a_delta_leaves_the_cache_equal_to_the_new_set() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");

        let a = set(&[(0, 0), (1, 0)]);
        let b = set(&[(1, 0), (1, 1), (-1, 0)]);
        r.apply(&reconcile(&BTreeSet::new(), &a), &mut cache, &live);
        assert_eq!(keys_of(&cache), a);
        r.apply(&reconcile(&a, &b), &mut cache, &live);
        assert_eq!(keys_of(&cache), b);
        assert_eq!(r.tracked_len(), 3);
        assert_eq!(live.active_topics().len(), 3);
    }

    #[test]
    fn fetches_and_topics_follow_the_delta() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");

        let fetches = r.apply(&reconcile(&BTreeSet::new(), &set(&[(2, -3)])), &mut cache, &live);
        assert_eq!(fetches.len(), 1);
        assert!(fetches[0].is_updating());
        assert_eq!(live.subscribe_count("/topic/block/2/-3"), 1);

        let fetches = r.apply(&reconcile(&set(&[(2, -3)]), &BTreeSet::new()), &mut cache, &live);
        assert_eq!(fetches, vec![FetchRequest { key: BlockKey::new(2, -3), purpose: FetchPurpose::Release }]);
        assert_eq!(live.unsubscribe_count("/topic/block/2/-3"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn repeated_or_jittering_deltas_do_not_duplicate_work() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");
        let k = set(&[(0, 0)]);
        let empty = BTreeSet::new();

        r.apply(&reconcile(&empty, &k), &mut cache, &live);
        // same addition delivered twice
        assert!(r.apply(&reconcile(&empty, &k), &mut cache, &live).is_empty());
        // removal of something never added
        assert!(r.apply(&reconcile(&set(&[(9, 9)]), &empty), &mut cache, &live).is_empty());
        assert_eq!(live.subscribe_count("/topic/block/0/0"), 1);

        // out, back in, out again
        r.apply(&reconcile(&k, &empty), &mut cache, &live);
        r.apply(&reconcile(&empty, &k), &mut cache, &live);
        r.apply(&reconcile(&k, &empty), &mut cache, &live);
        assert_eq!(live.subscribe_count("/topic/block/0/0"), 2);
        assert_eq!(live.unsubscribe_count("/topic/block/0/0"), 2);
        assert!(live.active_topics().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn each_delta_is_one_batched_notice() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "client-1");

        let a = set(&[(0, 0), (1, 0)]);
        let b = set(&[(1, 0), (2, 0), (3, 0)]);
        r.apply(&reconcile(&BTreeSet::new(), &a), &mut cache, &live);
        r.apply(&reconcile(&a, &b), &mut cache, &live);
        r.apply(&reconcile(&b, &b), &mut cache, &live);

        let published = live.published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(dest, _)| dest == UPDATE_REQUESTED_BLOCKS));
        let second: UpdateBlocks = serde_json::from_str(&published[1].1).unwrap();
        assert_eq!(second.client, "client-1");
        assert_eq!(second.blocks_to_add, vec![BlockKey::new(2, 0), BlockKey::new(3, 0)]);
        assert_eq!(second.blocks_to_remove, vec![BlockKey::new(0, 0)]);
    }

    #[test]
    fn stale_epochs_are_rejected() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");
        let k = set(&[(0, 0)]);
        let key = BlockKey::new(0, 0);

        let first = r.apply(&reconcile(&BTreeSet::new(), &k), &mut cache, &live);
        let FetchPurpose::Initial { epoch: old } = first[0].purpose else { panic!("initial fetch") };
        r.apply(&reconcile(&k, &BTreeSet::new()), &mut cache, &live);
        assert!(!r.accepts(&key, old));

        let again = r.apply(&reconcile(&BTreeSet::new(), &k), &mut cache, &live);
        let FetchPurpose::Initial { epoch: new } = again[0].purpose else { panic!("initial fetch") };
        assert_ne!(old, new);
        assert!(r.accepts(&key, new));
        assert!(!r.accepts(&key, old));
    }

    #[test]
    fn refused_subscribe_leaves_the_key_for_the_next_delta() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");
        let delta = reconcile(&BTreeSet::new(), &set(&[(0, 0), (1, 0)]));

        live.refuse_subscribes(1);
        let fetches = r.apply(&delta, &mut cache, &live);
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].key, BlockKey::new(1, 0));
        assert!(!r.is_tracked(&BlockKey::new(0, 0)));
        assert!(!cache.contains(&BlockKey::new(0, 0)));
        let notice: UpdateBlocks = serde_json::from_str(&live.published()[0].1).unwrap();
        assert_eq!(notice.blocks_to_add, vec![BlockKey::new(1, 0)]);

        let fetches = r.apply(&delta, &mut cache, &live);
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].key, BlockKey::new(0, 0));
        assert_eq!(r.tracked_len(), 2);
        assert_eq!(live.active_topics(), vec!["/topic/block/0/0", "/topic/block/1/0"]);
    }

    #[test]
    fn fan_in_uses_one_client_topic() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::FanIn, "abc");
        r.start(&live);
        r.start(&live);
        r.apply(&reconcile(&BTreeSet::new(), &set(&[(0, 0), (0, 1)])), &mut cache, &live);
        assert_eq!(live.active_topics(), vec!["/topic/client/abc".to_string()]);
        assert_eq!(r.subscription_count(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn release_all_clears_everything() {
        let (live, _rx) = MemoryLive::new();
        let mut cache = BlockCache::new();
        let mut r = Reconciler::new(LiveMode::PerBlock, "c");
        r.apply(&reconcile(&BTreeSet::new(), &set(&[(0, 0), (1, 1)])), &mut cache, &live);
        r.release_all(&mut cache, &live);

        assert!(live.active_topics().is_empty());
        assert!(cache.is_empty());
        assert_eq!(r.subscription_count(), 0);
        let (_, last) = live.published().pop().unwrap();
        let notice: UpdateBlocks = serde_json::from_str(&last).unwrap();
        assert_eq!(notice.blocks_to_remove.len(), 2);
    }

    #[test]
    fn live_mode_parses() {
        assert_eq!("fan-in".parse::<LiveMode>(), Ok(LiveMode::FanIn));
        assert_eq!("per-block".parse::<LiveMode>(), Ok(LiveMode::PerBlock));
        assert!("topic".parse::<LiveMode>().is_err());
    }
}
