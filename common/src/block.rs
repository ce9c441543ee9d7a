use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Block size used when the server cannot be asked for one.
pub const DEFAULT_BLOCK_SIZE: usize = 10;

/// Separator between the two integers of a block key.
pub const KEY_SEPARATOR: char = '/';

/// Integer coordinates of a block on the infinite grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockCoords {
    pub x: i64,
    pub y: i64,
}

impl BlockCoords {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn key(&self) -> BlockKey {
        BlockKey::new(self.x, self.y)
    }

    /// World-cell coordinates of this block's top-left cell, saturating at
    /// the ends of the `i64` range.
    pub fn origin(&self, block_size: usize) -> (i64, i64) {
        let size = block_size as i64;
        (self.x.saturating_mul(size), self.y.saturating_mul(size))
    }
}

impl fmt::Display for BlockCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Opaque identifier of a block, rendered as `"x/y"`.
///
/// Keys are built only from integer coordinates, so two keys are equal
/// exactly when their coordinates are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockKey {
    coords: BlockCoords,
    text: String,
}

impl BlockKey {
    pub fn new(x: i64, y: i64) -> Self {
        Self {
            coords: BlockCoords::new(x, y),
            text: format!("{x}{KEY_SEPARATOR}{y}"),
        }
    }

    pub fn coords(&self) -> BlockCoords {
        self.coords
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<BlockCoords> for BlockKey {
    fn from(coords: BlockCoords) -> Self {
        coords.key()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid block key {0:?}")]
pub struct KeyParseError(pub String);

impl FromStr for BlockKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        let x: i64 = x.parse().map_err(|_| KeyParseError(s.to_string()))?;
        let y: i64 = y.parse().map_err(|_| KeyParseError(s.to_string()))?;
        Ok(BlockKey::new(x, y))
    }
}

impl TryFrom<String> for BlockKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockKey> for String {
    fn from(key: BlockKey) -> Self {
        key.text
    }
}

/// Compute which block an integer world-cell coordinate falls in.
pub fn block_coords(x: i64, y: i64, block_size: usize) -> BlockCoords {
    let size = block_size as i64;
    BlockCoords::new(x.div_euclid(size), y.div_euclid(size))
}

/// Compute which block a real-valued world coordinate falls in.
pub fn world_to_block(world_x: f64, world_y: f64, block_size: usize) -> BlockCoords {
    block_coords(world_x.floor() as i64, world_y.floor() as i64, block_size)
}

/// Compute the local offset within a block for a world-cell coordinate.
pub fn local_coords(x: i64, y: i64, block_size: usize) -> (usize, usize) {
    let size = block_size as i64;
    (x.rem_euclid(size) as usize, y.rem_euclid(size) as usize)
}
