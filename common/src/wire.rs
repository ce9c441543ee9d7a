use serde::{Deserialize, Serialize};

use crate::block::{BlockCoords, BlockKey};
use crate::matrix::BlockMatrix;

/// A block record as carried on a client's fan-in topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub x: i64,
    pub y: i64,
    pub cells: BlockMatrix,
    #[serde(default)]
    pub generation: u64,
    /// Set by the server when it echoes a locally authored block.
    #[serde(default)]
    pub ghost_block: bool,
}

impl BlockRecord {
    pub fn coords(&self) -> BlockCoords {
        BlockCoords::new(self.x, self.y)
    }
}

/// The batched subscription delta sent to the server after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlocks {
    pub client: String,
    pub blocks_to_remove: Vec<BlockKey>,
    pub blocks_to_add: Vec<BlockKey>,
}

impl UpdateBlocks {
    pub fn is_empty(&self) -> bool {
        self.blocks_to_remove.is_empty() && self.blocks_to_add.is_empty()
    }
}

/// Server-side runner statistics from the state-info endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInfo {
    pub blocks_in_memory: u64,
    pub blocks_updating: u64,
}
