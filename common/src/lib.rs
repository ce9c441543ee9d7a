pub mod block;
pub mod matrix;
pub mod routes;
mod wire;

pub use block::{BlockCoords, BlockKey};
pub use matrix::{BlockMatrix, Cell, MatrixError, Rgb};
pub use wire::*;
