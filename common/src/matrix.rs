use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Decode an RGB332 byte: 3 bits red, 3 bits green, 2 bits blue.
    pub fn from_rgb332(v: u8) -> Self {
        let scale = |bits: u8, max: f64| ((bits as f64 / max) * 255.0).round() as u8;
        Self {
            r: scale((v >> 5) & 7, 7.0),
            g: scale((v >> 2) & 7, 7.0),
            b: scale(v & 3, 3.0),
        }
    }
}

/// The state of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Alive(bool),
    /// Transport-encoded color cell, packed as RGB332.
    Packed(u8),
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Alive(false)
    }
}

impl Cell {
    pub fn color(&self) -> Rgb {
        match *self {
            Cell::Alive(true) => Rgb::BLACK,
            Cell::Alive(false) => Rgb::WHITE,
            Cell::Packed(v) => Rgb::from_rgb332(v),
        }
    }
}

/// Wire form of a single cell. `null` is accepted and read as a dead cell.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireCell {
    Bool(bool),
    Packed(u8),
    Null(()),
}

impl From<WireCell> for Cell {
    fn from(value: WireCell) -> Self {
        match value {
            WireCell::Bool(b) => Cell::Alive(b),
            WireCell::Packed(v) => Cell::Packed(v),
            WireCell::Null(()) => Cell::Alive(false),
        }
    }
}

impl From<Cell> for WireCell {
    fn from(value: Cell) -> Self {
        match value {
            Cell::Alive(b) => WireCell::Bool(b),
            Cell::Packed(v) => WireCell::Packed(v),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("matrix has {got} columns, expected {expected}")]
    Columns { expected: usize, got: usize },
    #[error("column {column} has {got} cells, expected {expected}")]
    Rows {
        column: usize,
        expected: usize,
        got: usize,
    },
}

/// Square matrix of cells indexed `[local_x][local_y]`.
///
/// On the wire it is a JSON array of columns, each column an array of
/// booleans or RGB332 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockMatrix {
    columns: Vec<Vec<Cell>>,
}

impl BlockMatrix {
    /// An all-dead matrix of `size` × `size` cells.
    pub fn empty(size: usize) -> Self {
        Self {
            columns: vec![vec![Cell::default(); size]; size],
        }
    }

    fn from_columns(columns: Vec<Vec<Cell>>) -> Self {
        Self { columns }
    }

    /// Build a matrix by evaluating `f(local_x, local_y)` for every cell.
    pub fn from_fn(size: usize, mut f: impl FnMut(usize, usize) -> Cell) -> Self {
        Self::from_columns(
            (0..size)
                .map(|x| (0..size).map(|y| f(x, y)).collect())
                .collect(),
        )
    }

    /// Number of columns as received; equals the side length once validated.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Cell> {
        self.columns.get(x).and_then(|col| col.get(y)).copied()
    }

    pub fn set(&mut self, x: usize, y: usize, cell: Cell) -> bool {
        match self.columns.get_mut(x).and_then(|col| col.get_mut(y)) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|c| matches!(c, Cell::Alive(true)))
            .count()
    }

    /// Check that the matrix is exactly `size` × `size`.
    pub fn validate(&self, size: usize) -> Result<(), MatrixError> {
        if self.columns.len() != size {
            return Err(MatrixError::Columns {
                expected: size,
                got: self.columns.len(),
            });
        }
        for (column, cells) in self.columns.iter().enumerate() {
            if cells.len() != size {
                return Err(MatrixError::Rows {
                    column,
                    expected: size,
                    got: cells.len(),
                });
            }
        }
        Ok(())
    }
}

impl Serialize for BlockMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: Vec<Vec<WireCell>> = self
            .columns
            .iter()
            .map(|col| col.iter().map(|&c| WireCell::from(c)).collect())
            .collect();
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire: Vec<Vec<WireCell>> = Vec::deserialize(deserializer)?;
        let columns = wire
            .into_iter()
            .map(|col| col.into_iter().map(Cell::from).collect())
            .collect();
        Ok(Self::from_columns(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb332_channel_math() {
        assert_eq!(Rgb::from_rgb332(0b1110_0000), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_rgb332(0), Rgb::new(0, 0, 0));
        assert_eq!(Rgb::from_rgb332(255), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::from_rgb332(0b0001_1100), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::from_rgb332(0b0000_0011), Rgb::new(0, 0, 255));
        // 1/7 of full scale rounds, not truncates
        assert_eq!(Rgb::from_rgb332(0b0010_0000).r, 36);
        assert_eq!(Rgb::from_rgb332(0b0000_0001).b, 85);
    }

    #[test]
    fn boolean_cells_are_black_and_white() {
        assert_eq!(Cell::Alive(true).color(), Rgb::BLACK);
        assert_eq!(Cell::Alive(false).color(), Rgb::WHITE);
    }

    #[test]
    fn decodes_boolean_and_packed_columns() {
        let bools: BlockMatrix = serde_json::from_str("[[true,false],[null,true]]").unwrap();
        assert_eq!(bools.get(0, 0), Some(Cell::Alive(true)));
        assert_eq!(bools.get(1, 0), Some(Cell::Alive(false)));
        assert_eq!(bools.alive_count(), 2);

        let packed: BlockMatrix = serde_json::from_str("[[224,0],[3,255]]").unwrap();
        assert_eq!(packed.get(0, 0), Some(Cell::Packed(224)));
        assert_eq!(packed.get(1, 1).map(|c| c.color()), Some(Rgb::WHITE));
    }

    #[test]
    fn serializes_as_nested_arrays() {
        let mut m = BlockMatrix::empty(2);
        m.set(1, 0, Cell::Alive(true));
        assert_eq!(serde_json::to_string(&m).unwrap(), "[[false,false],[true,false]]");
    }

    #[test]
    fn validate_reports_shape_mismatch() {
        assert!(BlockMatrix::empty(3).validate(3).is_ok());
        assert_eq!(
            BlockMatrix::empty(2).validate(3),
            Err(MatrixError::Columns { expected: 3, got: 2 })
        );
        let ragged = BlockMatrix::from_columns(vec![vec![Cell::default(); 2], vec![Cell::default(); 1]]);
        assert_eq!(
            ragged.validate(2),
            Err(MatrixError::Rows { column: 1, expected: 2, got: 1 })
        );
    }

    #[test]
    fn rejects_out_of_range_cells() {
        assert!(serde_json::from_str::<BlockMatrix>("[[256]]").is_err());
        assert!(serde_json::from_str::<BlockMatrix>("[[\"x\"]]").is_err());
    }
}
