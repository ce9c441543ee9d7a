use common::BlockKey;
use thiserror::Error;

/// Failure of a network collaborator. Never fatal to the render loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("invalid payload: {0}")]
    Decode(String),
    #[error("live channel closed")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("no block is selected")]
    NothingSelected,
    #[error("block {0} is not visible")]
    NotVisible(BlockKey),
    #[error("block {0} is already being edited")]
    LockedElsewhere(BlockKey),
    #[error("no block is being edited")]
    NotEditing,
    #[error("block {0} has no data yet")]
    NoData(BlockKey),
    #[error("a commit for block {0} is still in flight")]
    CommitInFlight(BlockKey),
}
