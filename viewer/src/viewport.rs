//! Pan/zoom state and the conversions between canvas pixels, world cells
//! and blocks.

use common::block::world_to_block;
use common::BlockCoords;

use crate::render::Rect;

/// Largest world-cell offset the viewport will move to on either axis.
/// Past this, `f64` loses sub-cell precision and block origins approach the
/// `i64` range.
pub const WORLD_LIMIT: f64 = 1e12;

fn clamp_offset(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-WORLD_LIMIT, WORLD_LIMIT)
    } else {
        0.0
    }
}

/// Allowed range of pixels per cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomBounds {
    pub min_cell_size: f64,
    pub max_cell_size: f64,
}

impl Default for ZoomBounds {
    fn default() -> Self {
        Self {
            min_cell_size: 2.0,
            max_cell_size: 50.0,
        }
    }
}

impl ZoomBounds {
    pub fn clamp(&self, cell_size: f64) -> f64 {
        cell_size.clamp(self.min_cell_size, self.max_cell_size)
    }
}

/// Inclusive range of block indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: BlockCoords,
    pub end: BlockCoords,
}

impl BlockRange {
    pub fn width(&self) -> u64 {
        (self.end.x - self.start.x + 1) as u64
    }

    pub fn height(&self) -> u64 {
        (self.end.y - self.start.y + 1) as u64
    }

    pub fn contains(&self, coords: BlockCoords) -> bool {
        (self.start.x..=self.end.x).contains(&coords.x)
            && (self.start.y..=self.end.y).contains(&coords.y)
    }

    /// Row-major iteration over every block in the range.
    pub fn iter(&self) -> impl Iterator<Item = BlockCoords> + '_ {
        (self.start.y..=self.end.y)
            .flat_map(move |y| (self.start.x..=self.end.x).map(move |x| BlockCoords::new(x, y)))
    }
}

/// The visible pixel rectangle plus its pan offset and zoom scale.
///
/// `cell_offset_x/y` is the world-cell coordinate of the canvas's top-left
/// corner. `cell_size` never leaves the configured [`ZoomBounds`], and the
/// moving operations keep both offsets within [`WORLD_LIMIT`].
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub cell_offset_x: f64,
    pub cell_offset_y: f64,
    cell_size: f64,
    canvas_width: f64,
    canvas_height: f64,
    bounds: ZoomBounds,
}

impl Viewport {
    pub fn new(canvas_width: f64, canvas_height: f64, cell_size: f64, bounds: ZoomBounds) -> Self {
        Self {
            cell_offset_x: 0.0,
            cell_offset_y: 0.0,
            cell_size: bounds.clamp(cell_size),
            canvas_width,
            canvas_height,
            bounds,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn canvas_width(&self) -> f64 {
        self.canvas_width
    }

    pub fn canvas_height(&self) -> f64 {
        self.canvas_height
    }

    pub fn bounds(&self) -> ZoomBounds {
        self.bounds
    }

    pub fn set_cell_size(&mut self, cell_size: f64) {
        self.cell_size = self.bounds.clamp(cell_size);
    }

    pub fn pixel_to_world(&self, canvas_x: f64, canvas_y: f64) -> (f64, f64) {
        (
            self.cell_offset_x + canvas_x / self.cell_size,
            self.cell_offset_y + canvas_y / self.cell_size,
        )
    }

    pub fn world_to_pixel(&self, world_x: f64, world_y: f64) -> (f64, f64) {
        (
            (world_x - self.cell_offset_x) * self.cell_size,
            (world_y - self.cell_offset_y) * self.cell_size,
        )
    }

    /// Block under the given canvas pixel.
    pub fn block_at(&self, canvas_x: f64, canvas_y: f64, block_size: usize) -> BlockCoords {
        let (wx, wy) = self.pixel_to_world(canvas_x, canvas_y);
        world_to_block(wx, wy, block_size)
    }

    /// Canvas rectangle covered by a block.
    pub fn block_rect(&self, coords: BlockCoords, block_size: usize) -> Rect {
        let (ox, oy) = coords.origin(block_size);
        let (x, y) = self.world_to_pixel(ox as f64, oy as f64);
        let side = block_size as f64 * self.cell_size;
        Rect::new(x, y, side, side)
    }

    /// Inclusive range of blocks overlapping the visible world rectangle
    /// `[off, off + canvas / cell_size)` on each axis. `None` when the
    /// viewport is degenerate.
    pub fn visible_block_range(&self, block_size: usize) -> Option<BlockRange> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if block_size == 0
            || !usable(self.cell_size)
            || !usable(self.canvas_width)
            || !usable(self.canvas_height)
            || !self.cell_offset_x.is_finite()
            || !self.cell_offset_y.is_finite()
        {
            return None;
        }
        let size = block_size as f64;
        let right = self.cell_offset_x + self.canvas_width / self.cell_size;
        let bottom = self.cell_offset_y + self.canvas_height / self.cell_size;

        let start = BlockCoords::new(
            (self.cell_offset_x / size).floor() as i64,
            (self.cell_offset_y / size).floor() as i64,
        );
        let end = BlockCoords::new(
            (right / size).ceil() as i64 - 1,
            (bottom / size).ceil() as i64 - 1,
        );
        if end.x < start.x || end.y < start.y {
            return None;
        }
        Some(BlockRange { start, end })
    }

    /// Move the view by a pointer delta in pixels. Dragging right moves the
    /// visible world left.
    pub fn pan_pixels(&mut self, dx: f64, dy: f64) {
        self.cell_offset_x = clamp_offset(self.cell_offset_x - dx / self.cell_size);
        self.cell_offset_y = clamp_offset(self.cell_offset_y - dy / self.cell_size);
    }

    /// Scale `cell_size` by `factor` keeping the world point under
    /// `(canvas_x, canvas_y)` fixed. Returns false when the clamp left the
    /// zoom unchanged.
    pub fn zoom_at(&mut self, canvas_x: f64, canvas_y: f64, factor: f64) -> bool {
        let next = self.bounds.clamp(self.cell_size * factor);
        if next == self.cell_size || !next.is_finite() {
            return false;
        }
        let (wx, wy) = self.pixel_to_world(canvas_x, canvas_y);
        self.cell_size = next;
        self.cell_offset_x = clamp_offset(wx - canvas_x / self.cell_size);
        self.cell_offset_y = clamp_offset(wy - canvas_y / self.cell_size);
        true
    }

    /// Put the world point at the center of the canvas.
    pub fn center_on(&mut self, world_x: f64, world_y: f64) {
        self.cell_offset_x = clamp_offset(world_x - (self.canvas_width / self.cell_size) / 2.0);
        self.cell_offset_y = clamp_offset(world_y - (self.canvas_height / self.cell_size) / 2.0);
    }

    /// Jump so the top-left corner sits on the given cell. Input is clamped
    /// to `max(0, floor(v))` and then to [`WORLD_LIMIT`].
    pub fn teleport(&mut self, x: f64, y: f64) {
        let sanitize = |v: f64| if v.is_finite() { clamp_offset(v.floor().max(0.0)) } else { 0.0 };
        self.cell_offset_x = sanitize(x);
        self.cell_offset_y = sanitize(y);
    }

    /// Back to the origin at the given zoom.
    pub fn reset(&mut self, cell_size: f64) {
        self.cell_size = self.bounds.clamp(cell_size);
        self.cell_offset_x = 0.0;
        self.cell_offset_y = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(w: f64, h: f64, cell: f64) -> Viewport {
        Viewport::new(w, h, cell, ZoomBounds::default())
    }

    #[test]
    fn pixel_world_round_trip() {
        let mut vp = viewport(800.0, 400.0, 8.0);
        vp.cell_offset_x = -12.25;
        vp.cell_offset_y = 3.5;
        let (wx, wy) = vp.pixel_to_world(100.0, 44.0);
        assert_eq!((wx, wy), (0.25, 9.0));
        assert_eq!(vp.world_to_pixel(wx, wy), (100.0, 44.0));
    }

    #[test]
    fn reference_viewport_range() {
        let vp = viewport(1200.0, 600.0, 10.0);
        let range = vp.visible_block_range(10).unwrap();
        assert_eq!(range.start, BlockCoords::new(0, 0));
        assert_eq!(range.end, BlockCoords::new(11, 5));
        assert_eq!(range.width() * range.height(), 72);
    }

    #[test]
    fn panning_one_block_shifts_range_by_one() {
        let mut vp = viewport(1200.0, 600.0, 10.0);
        let before = vp.visible_block_range(10).unwrap();
        vp.pan_pixels(-100.0, -100.0);
        let after = vp.visible_block_range(10).unwrap();
        assert_eq!(after.start, BlockCoords::new(before.start.x + 1, before.start.y + 1));
        assert_eq!(after.end, BlockCoords::new(before.end.x + 1, before.end.y + 1));
    }

    #[test]
    fn range_covers_viewport_without_outsiders() {
        let block_size = 7;
        for &(ox, oy, cell) in &[
            (0.0, 0.0, 10.0),
            (-13.3, 4.9, 8.7),
            (5.0, -21.0, 2.0),
            (-0.0001, 69.9999, 50.0),
            (140.5, -140.5, 3.3),
        ] {
            let mut vp = viewport(640.0, 480.0, cell);
            vp.cell_offset_x = ox;
            vp.cell_offset_y = oy;
            let range = vp.visible_block_range(block_size).unwrap();
            let rect = Rect::new(0.0, 0.0, 640.0, 480.0);

            // corners of the canvas fall inside the range
            for &(px, py) in &[(0.0, 0.0), (639.99, 0.0), (0.0, 479.99), (639.99, 479.99)] {
                assert!(range.contains(vp.block_at(px, py, block_size)), "{ox},{oy},{cell}");
            }
            // every block in the range overlaps the canvas
            for coords in range.iter() {
                let r = vp.block_rect(coords, block_size);
                assert!(r.intersects(&rect), "block {coords} outside for {ox},{oy},{cell}");
            }
        }
    }

    #[test]
    fn negative_offsets_reach_negative_blocks() {
        let mut vp = viewport(100.0, 100.0, 10.0);
        vp.cell_offset_x = -15.0;
        vp.cell_offset_y = -1.0;
        let range = vp.visible_block_range(10).unwrap();
        assert_eq!(range.start, BlockCoords::new(-2, -1));
        assert_eq!(range.end, BlockCoords::new(-1, 0));
    }

    #[test]
    fn degenerate_viewports_have_no_range() {
        assert!(viewport(0.0, 600.0, 10.0).visible_block_range(10).is_none());
        assert!(viewport(100.0, -1.0, 10.0).visible_block_range(10).is_none());
        assert!(viewport(100.0, 100.0, 10.0).visible_block_range(0).is_none());
        let mut vp = viewport(100.0, 100.0, 10.0);
        vp.cell_offset_x = f64::NAN;
        assert!(vp.visible_block_range(10).is_none());
    }

    #[test]
    fn zoom_keeps_world_point_under_pointer() {
        let mut vp = viewport(1200.0, 600.0, 8.7);
        vp.cell_offset_x = -3.2;
        vp.cell_offset_y = 17.9;
        for &(px, py, factor) in &[(300.0, 200.0, 1.1), (0.0, 599.0, 0.9), (1199.0, 1.0, 1.1)] {
            let before = vp.pixel_to_world(px, py);
            assert!(vp.zoom_at(px, py, factor));
            let after = vp.pixel_to_world(px, py);
            assert!((before.0 - after.0).abs() < 1e-9);
            assert!((before.1 - after.1).abs() < 1e-9);
        }
    }

    #[test]
    fn zoom_is_clamped() {
        let mut vp = viewport(100.0, 100.0, 49.0);
        assert!(vp.zoom_at(50.0, 50.0, 1.1));
        assert_eq!(vp.cell_size(), 50.0);
        assert!(!vp.zoom_at(50.0, 50.0, 1.1));
        vp.set_cell_size(0.1);
        assert_eq!(vp.cell_size(), 2.0);
        assert!(!vp.zoom_at(10.0, 10.0, 0.9));
    }

    #[test]
    fn teleport_clamps_input() {
        let mut vp = viewport(100.0, 100.0, 10.0);
        vp.teleport(-5.0, 12.7);
        assert_eq!((vp.cell_offset_x, vp.cell_offset_y), (0.0, 12.0));
        vp.teleport(f64::NAN, 3.0);
        assert_eq!((vp.cell_offset_x, vp.cell_offset_y), (0.0, 3.0));
    }

    #[test]
    fn far_teleports_stop_at_the_world_limit() {
        let mut vp = viewport(8000.0, 600.0, 2.0);
        for target in [9.3e18, 1e30, f64::MAX] {
            vp.teleport(target, target);
            assert_eq!((vp.cell_offset_x, vp.cell_offset_y), (WORLD_LIMIT, WORLD_LIMIT));
            let range = vp.visible_block_range(2).unwrap();
            assert_eq!(range.start, BlockCoords::new(5e11 as i64, 5e11 as i64));
            assert_eq!(range.width(), 2000);
            assert_eq!(range.height(), 150);
        }
    }

    #[test]
    fn moves_never_leave_the_world_limit() {
        let mut vp = viewport(100.0, 100.0, 10.0);
        vp.center_on(-1e20, 1e20);
        assert_eq!((vp.cell_offset_x, vp.cell_offset_y), (-WORLD_LIMIT, WORLD_LIMIT));
        vp.pan_pixels(1e15, -1e15);
        assert_eq!((vp.cell_offset_x, vp.cell_offset_y), (-WORLD_LIMIT, WORLD_LIMIT));
        vp.pan_pixels(f64::INFINITY, 0.0);
        assert_eq!(vp.cell_offset_x, 0.0);
        assert!(vp.visible_block_range(10).is_some());
    }

    #[test]
    fn center_on_puts_point_mid_canvas() {
        let mut vp = viewport(200.0, 100.0, 10.0);
        vp.center_on(50.0, 50.0);
        assert_eq!(vp.world_to_pixel(50.0, 50.0), (100.0, 50.0));
    }
}
