//! Line-oriented driver for a headless session.

use std::time::Instant;

use common::BlockCoords;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use viewer::{PointerButton, PointerEvent, PointerKind, SessionHandle, ViewCommand};

pub const HELP: &str = "\
commands:
  drag X0 Y0 X1 Y1     drag the canvas between two pixels
  wheel X Y DY         scroll at a pixel (DY > 0 zooms out)
  dblclick X Y         select the block under a pixel
  teleport X Y         jump the top-left corner to a cell
  center X Y           center the view on a cell
  reset                back to the origin at the initial zoom
  select BX BY | none  select a block by its coordinates
  edit                 lock the selected block for editing
  random [LIVENESS]    fill the edited block with random cells
  commit               send the edited block to the server
  cancel               drop the edit and reload the block
  grid on|off          toggle grid lines
  quit                 shut down";

/// Milliseconds between the synthetic events of one `drag`.
const DRAG_STEP_MS: u64 = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Pointer(Vec<PointerEvent>),
    View(ViewCommand),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: {0:?}")]
    Number(String),
}

fn numbers<T: std::str::FromStr>(
    args: &[&str],
    count: usize,
    usage: &'static str,
) -> Result<Vec<T>, ParseError> {
    if args.len() != count {
        return Err(ParseError::Usage(usage));
    }
    args.iter()
        .map(|a| a.parse().map_err(|_| ParseError::Number(a.to_string())))
        .collect()
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
/// `now_ms` stamps the pointer events the line produces.
pub fn parse(line: &str, now_ms: u64) -> Result<Option<Line>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let press = PointerKind::Press(PointerButton::Primary);

    let parsed = match name {
        "drag" => {
            let v: Vec<f64> = numbers(&args, 4, "drag X0 Y0 X1 Y1")?;
            Line::Pointer(vec![
                PointerEvent::new(press, v[0], v[1], now_ms),
                PointerEvent::new(PointerKind::Move, v[2], v[3], now_ms + DRAG_STEP_MS),
                PointerEvent::new(PointerKind::Release, v[2], v[3], now_ms + 2 * DRAG_STEP_MS),
            ])
        }
        "wheel" => {
            let v: Vec<f64> = numbers(&args, 3, "wheel X Y DY")?;
            Line::Pointer(vec![PointerEvent::new(
                PointerKind::Wheel { delta_y: v[2] },
                v[0],
                v[1],
                now_ms,
            )])
        }
        "dblclick" => {
            let v: Vec<f64> = numbers(&args, 2, "dblclick X Y")?;
            Line::Pointer(vec![PointerEvent::new(PointerKind::DoubleClick, v[0], v[1], now_ms)])
        }
        "teleport" => {
            let v: Vec<f64> = numbers(&args, 2, "teleport X Y")?;
            Line::View(ViewCommand::Teleport { x: v[0], y: v[1] })
        }
        "center" => {
            let v: Vec<f64> = numbers(&args, 2, "center X Y")?;
            Line::View(ViewCommand::CenterOn { x: v[0], y: v[1] })
        }
        "reset" => Line::View(ViewCommand::ResetView),
        "select" => match args.as_slice() {
            ["none"] => Line::View(ViewCommand::Select(None)),
            _ => {
                let v: Vec<i64> = numbers(&args, 2, "select BX BY | none")?;
                Line::View(ViewCommand::Select(Some(BlockCoords::new(v[0], v[1]))))
            }
        },
        "edit" => Line::View(ViewCommand::BeginEdit),
        "random" => {
            let liveness = match args.as_slice() {
                [] => None,
                [_] => Some(numbers::<u32>(&args, 1, "random [LIVENESS]")?[0]),
                _ => return Err(ParseError::Usage("random [LIVENESS]")),
            };
            Line::View(ViewCommand::Randomize { liveness })
        }
        "commit" => Line::View(ViewCommand::Commit),
        "cancel" => Line::View(ViewCommand::CancelEdit),
        "grid" => match args.as_slice() {
            ["on"] => Line::View(ViewCommand::ShowGrid(true)),
            ["off"] => Line::View(ViewCommand::ShowGrid(false)),
            _ => return Err(ParseError::Usage("grid on|off")),
        },
        "help" | "?" => Line::Help,
        "quit" | "exit" => Line::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(parsed))
}

/// Feed stdin lines into the session until `quit` or end of input.
pub async fn read_stdin(handle: SessionHandle, quit: oneshot::Sender<()>) {
    let started = Instant::now();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Input closed");
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                return;
            }
        };
        let now_ms = started.elapsed().as_millis() as u64;
        let delivered = match parse(&line, now_ms) {
            Ok(None) => true,
            Ok(Some(Line::Pointer(events))) => events.into_iter().all(|e| handle.pointer(e)),
            Ok(Some(Line::View(command))) => handle.command(command),
            Ok(Some(Line::Help)) => {
                println!("{HELP}");
                true
            }
            Ok(Some(Line::Quit)) => {
                let _ = quit.send(());
                return;
            }
            Err(e) => {
                tracing::warn!("{}", e);
                true
            }
        };
        if !delivered {
            return;
        }
    }
}
