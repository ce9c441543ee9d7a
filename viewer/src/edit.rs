use common::{BlockMatrix, Cell};
use rand::Rng;

/// A ghost matrix where each cell is alive with probability `1 / liveness`.
/// A liveness of 0 is treated as 1.
pub fn random_matrix<R: Rng>(size: usize, liveness: u32, rng: &mut R) -> BlockMatrix {
    let liveness = liveness.max(1);
    BlockMatrix::from_fn(size, |_, _| Cell::Alive(rng.gen_range(0..liveness) == 0))
}
