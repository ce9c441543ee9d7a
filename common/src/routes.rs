use crate::block::BlockCoords;

/// HTTP path returning the session's block size.
pub const BLOCK_SIZE_PATH: &str = "/gen-api/blocksize";

/// HTTP path returning runner statistics.
pub const STATE_INFO_PATH: &str = "/gen-api/state-info";

/// Destination of the batched subscription delta.
pub const UPDATE_REQUESTED_BLOCKS: &str = "/update-requested-blocks";

/// Build the HTTP path for a block's state.
pub fn block_path(coords: BlockCoords) -> String {
    format!("/gen-api/block/{}/{}", coords.x, coords.y)
}

/// Build the HTTP path used to commit a locally authored block.
pub fn set_block_path(coords: BlockCoords) -> String {
    format!("/gen-api/block/{}/{}/set-block", coords.x, coords.y)
}

/// Build the live-update topic for a single block.
pub fn block_topic(coords: BlockCoords) -> String {
    format!("/topic/block/{}/{}", coords.x, coords.y)
}

/// Build the fan-in topic carrying every block requested by one client.
pub fn client_topic(client_id: &str) -> String {
    format!("/topic/client/{client_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_embed_signed_coordinates() {
        let c = BlockCoords::new(-4, 9);
        assert_eq!(block_path(c), "/gen-api/block/-4/9");
        assert_eq!(set_block_path(c), "/gen-api/block/-4/9/set-block");
        assert_eq!(block_topic(c), "/topic/block/-4/9");
        assert_eq!(client_topic("abc"), "/topic/client/abc");
    }
}
