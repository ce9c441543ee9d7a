use std::collections::BTreeSet;

use common::BlockKey;

use crate::viewport::Viewport;

/// Keys of every block intersecting the viewport. Empty for a degenerate
/// viewport.
pub fn resolve(viewport: &Viewport, block_size: usize) -> BTreeSet<BlockKey> {
    match viewport.visible_block_range(block_size) {
        Some(range) => range.iter().map(|c| c.key()).collect(),
        None => BTreeSet::new(),
    }
}
