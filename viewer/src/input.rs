//! Pointer and wheel input as an explicit state machine.

use common::BlockCoords;

use crate::viewport::Viewport;

/// Two presses closer than this in time form a double click.
pub const DOUBLE_CLICK_MS: u64 = 300;

/// Movement under this many pixels still counts as a click.
pub const CLICK_SLOP_PX: f64 = 4.0;

pub const ZOOM_IN: f64 = 1.1;
pub const ZOOM_OUT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerKind {
    Press(PointerButton),
    Move,
    Release,
    /// The pointer left the canvas.
    Leave,
    /// Positive `delta_y` scrolls down, which zooms out.
    Wheel { delta_y: f64 },
    /// A toolkit-level double click, for platforms that report one.
    DoubleClick,
}

/// Toolkit-independent pointer event in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: u64,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self { kind, x, y, timestamp_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputOutcome {
    None,
    Panned,
    Zoomed,
    Selected(BlockCoords),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PointerState {
    Idle,
    Dragging {
        origin_x: f64,
        origin_y: f64,
        last_x: f64,
        last_y: f64,
        pressed_at: u64,
        moved: bool,
    },
    /// A double click selected a block; everything up to the release is
    /// swallowed so it cannot turn into a drag.
    Selecting,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Click {
    x: f64,
    y: f64,
    at: u64,
}

impl Click {
    fn pairs_with(&self, x: f64, y: f64, at: u64) -> bool {
        at.saturating_sub(self.at) <= DOUBLE_CLICK_MS
            && (x - self.x).hypot(y - self.y) <= CLICK_SLOP_PX
    }
}

#[derive(Debug)]
pub struct InteractionHandler {
    state: PointerState,
    last_click: Option<Click>,
    last_selection: Option<Click>,
}

impl Default for InteractionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionHandler {
    pub fn new() -> Self {
        Self {
            state: PointerState::Idle,
            last_click: None,
            last_selection: None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, PointerState::Dragging { .. })
    }

    /// Feed one event, updating the viewport in place.
    pub fn handle(
        &mut self,
        event: PointerEvent,
        viewport: &mut Viewport,
        block_size: usize,
    ) -> InputOutcome {
        let PointerEvent { kind, x, y, timestamp_ms } = event;
        match kind {
            PointerKind::Press(PointerButton::Primary) => {
                if self.state != PointerState::Idle {
                    return InputOutcome::None;
                }
                if self.last_click.take().is_some_and(|c| c.pairs_with(x, y, timestamp_ms)) {
                    self.state = PointerState::Selecting;
                    return self.select(x, y, timestamp_ms, viewport, block_size);
                }
                self.state = PointerState::Dragging {
                    origin_x: x,
                    origin_y: y,
                    last_x: x,
                    last_y: y,
                    pressed_at: timestamp_ms,
                    moved: false,
                };
                InputOutcome::None
            }
            PointerKind::Press(_) => InputOutcome::None,
            PointerKind::Move => {
                let PointerState::Dragging {
                    origin_x,
                    origin_y,
                    last_x,
                    last_y,
                    pressed_at,
                    moved,
                } = self.state
                else {
                    return InputOutcome::None;
                };
                self.state = PointerState::Dragging {
                    origin_x,
                    origin_y,
                    last_x: x,
                    last_y: y,
                    pressed_at,
                    moved: moved || (x - origin_x).hypot(y - origin_y) > CLICK_SLOP_PX,
                };
                let (dx, dy) = (x - last_x, y - last_y);
                if dx == 0.0 && dy == 0.0 {
                    return InputOutcome::None;
                }
                viewport.pan_pixels(dx, dy);
                InputOutcome::Panned
            }
            PointerKind::Release => {
                if let PointerState::Dragging { moved, pressed_at, .. } = self.state {
                    self.last_click = (!moved).then_some(Click { x, y, at: pressed_at });
                }
                self.state = PointerState::Idle;
                InputOutcome::None
            }
            PointerKind::Leave => {
                self.state = PointerState::Idle;
                self.last_click = None;
                InputOutcome::None
            }
            PointerKind::Wheel { delta_y } => {
                let factor = if delta_y > 0.0 { ZOOM_OUT } else { ZOOM_IN };
                if viewport.zoom_at(x, y, factor) {
                    InputOutcome::Zoomed
                } else {
                    InputOutcome::None
                }
            }
            PointerKind::DoubleClick => {
                // The presses of this double click may already have selected.
                if self.state != PointerState::Idle
                    || self.last_selection.is_some_and(|c| c.pairs_with(x, y, timestamp_ms))
                {
                    return InputOutcome::None;
                }
                self.last_click = None;
                self.select(x, y, timestamp_ms, viewport, block_size)
            }
        }
    }

    fn select(
        &mut self,
        x: f64,
        y: f64,
        at: u64,
        viewport: &Viewport,
        block_size: usize,
    ) -> InputOutcome {
        self.last_selection = Some(Click { x, y, at });
        InputOutcome::Selected(viewport.block_at(x, y, block_size))
    }
}
