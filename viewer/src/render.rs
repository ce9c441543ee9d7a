//! Projecting cached blocks into draw calls.

use std::collections::BTreeSet;

use common::block::local_coords;
use common::{BlockCoords, BlockKey, BlockMatrix, Rgb};

use crate::cache::BlockCache;
use crate::viewport::Viewport;

/// Axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// True when the two rectangles share some area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

/// A 2D drawing target.
pub trait Surface {
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    fn clear(&mut self, color: Rgb);
    fn fill_rect(&mut self, rect: Rect, color: Rgb);
    fn stroke_rect(&mut self, rect: Rect, color: Rgb, line_width: f64);
}

pub const BACKGROUND: Rgb = Rgb::WHITE;
pub const PLACEHOLDER_FILL: Rgb = Rgb::new(173, 216, 230);
pub const PLACEHOLDER_BORDER: Rgb = Rgb::new(255, 0, 0);
pub const BLOCK_BORDER: Rgb = Rgb::new(255, 51, 51);
pub const GRID_LINE: Rgb = Rgb::new(204, 204, 204);
pub const SELECTED_BORDER: Rgb = Rgb::new(0, 112, 255);
pub const EDIT_BORDER: Rgb = Rgb::new(0, 170, 68);

#[derive(Debug, Clone, PartialEq)]
pub struct RenderStyle {
    pub show_grid: bool,
    /// Grid lines are skipped below this many pixels per cell.
    pub min_cell_size_for_grid: f64,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            show_grid: true,
            min_cell_size_for_grid: 4.0,
        }
    }
}

/// Everything a frame is drawn from.
pub struct Frame<'a> {
    pub viewport: &'a Viewport,
    pub cache: &'a BlockCache,
    pub block_size: usize,
    pub selected: Option<BlockCoords>,
    pub style: &'a RenderStyle,
}

/// Counters from one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub blocks: usize,
    pub placeholders: usize,
    pub cells: usize,
}

/// Clear the surface and draw every visible block.
pub fn draw_frame(
    surface: &mut dyn Surface,
    frame: &Frame<'_>,
    visible: &BTreeSet<BlockKey>,
) -> RenderStats {
    surface.clear(BACKGROUND);
    let mut stats = RenderStats::default();
    for key in visible {
        stats.blocks += 1;
        match frame.cache.get(key) {
            Some(matrix) => stats.cells += draw_block(surface, frame, key.coords(), matrix),
            None => {
                draw_placeholder(surface, frame, key.coords());
                stats.placeholders += 1;
            }
        }
    }

    // Outlines go last so neighbors don't paint over them.
    if let Some(key) = frame.cache.edit_lock() {
        if visible.contains(key) {
            let rect = frame.viewport.block_rect(key.coords(), frame.block_size);
            surface.stroke_rect(rect, EDIT_BORDER, 3.0);
        }
    }
    if let Some(selected) = frame.selected {
        if visible.contains(&selected.key()) {
            let rect = frame.viewport.block_rect(selected, frame.block_size);
            surface.stroke_rect(rect, SELECTED_BORDER, 4.0);
        }
    }
    stats
}

/// Draw one block's cells and border. Returns the number of cells drawn.
pub fn draw_block(
    surface: &mut dyn Surface,
    frame: &Frame<'_>,
    coords: BlockCoords,
    matrix: &BlockMatrix,
) -> usize {
    let viewport = frame.viewport;
    let cell = viewport.cell_size();
    let canvas = Rect::new(0.0, 0.0, surface.width(), surface.height());
    let grid = frame.style.show_grid && cell >= frame.style.min_cell_size_for_grid;
    let (base_x, base_y) = coords.origin(frame.block_size);
    let side = frame.block_size as i64;

    let mut drawn = 0;
    for world_x in base_x..base_x.saturating_add(side) {
        for world_y in base_y..base_y.saturating_add(side) {
            let (px, py) = viewport.world_to_pixel(world_x as f64, world_y as f64);
            let rect = Rect::new(px, py, cell, cell);
            if !rect.intersects(&canvas) {
                continue;
            }
            let (local_x, local_y) = local_coords(world_x, world_y, frame.block_size);
            let color = matrix.get(local_x, local_y).unwrap_or_default().color();
            surface.fill_rect(rect, color);
            if grid {
                surface.stroke_rect(rect, GRID_LINE, 0.5);
            }
            drawn += 1;
        }
    }

    surface.stroke_rect(viewport.block_rect(coords, frame.block_size), BLOCK_BORDER, 1.0);
    drawn
}

fn draw_placeholder(surface: &mut dyn Surface, frame: &Frame<'_>, coords: BlockCoords) {
    let rect = frame.viewport.block_rect(coords, frame.block_size);
    surface.fill_rect(rect, PLACEHOLDER_FILL);
    surface.stroke_rect(rect, PLACEHOLDER_BORDER, 2.0);
}
