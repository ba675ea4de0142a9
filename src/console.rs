//! Text console
//!
//! A character grid fed by the guest's output sink, plus the `CLS` and
//! `COLOR` statements registered through the bridge.

use crate::abi::TypeTag;
use crate::runtime::{ExternalFunction, FunctionProvider};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Screen addressed by the statement forms without a screen argument.
pub const DEFAULT_TEXT_SCREEN: i32 = 4;

const DEFAULT_COLOR: u32 = 0xFFFF_FFFF;
const NEWLINE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub code_point: u32,
    pub color: u32,
    pub attr: u32,
}

impl Cell {
    pub const BLANK: Cell = Cell {
        code_point: 0,
        color: DEFAULT_COLOR,
        attr: 0,
    };
}

/// Fixed-size grid of cells with a cursor.
///
/// Writing past the last column wraps, and a new line past the last row
/// scrolls everything up by one row.
#[derive(Debug, Clone)]
pub struct TextGrid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
    cursor: (usize, usize),
    color: u32,
    attr: u32,
}

impl TextGrid {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cells: vec![Cell::BLANK; width * height],
            cursor: (0, 0),
            color: DEFAULT_COLOR,
            attr: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Cursor as (column, row).
    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn set_color(&mut self, rgba: u32) {
        self.color = rgba;
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<Cell> {
        if x < self.width && y < self.height {
            Some(self.cells[y * self.width + x])
        } else {
            None
        }
    }

    /// Write one code point at the cursor. A newline is stored in the
    /// cell too, then moves to the start of the next row.
    pub fn putch32(&mut self, code_point: u32) {
        let (x, y) = self.cursor;
        self.cells[y * self.width + x] = Cell {
            code_point,
            color: self.color,
            attr: self.attr,
        };
        if code_point == NEWLINE {
            self.next_line();
        } else {
            self.advance();
        }
    }

    /// Blank every cell. The cursor stays where it is.
    pub fn clear(&mut self) {
        self.cells.fill(Cell::BLANK);
    }

    /// Plain text view: one line per row with trailing blanks trimmed,
    /// trailing empty rows dropped.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .cells
            .chunks(self.width)
            .map(|row| {
                let line: String = row
                    .iter()
                    .map(|cell| match cell.code_point {
                        0 | NEWLINE => ' ',
                        c => char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER),
                    })
                    .collect();
                line.trim_end().to_string()
            })
            .collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    fn advance(&mut self) {
        self.cursor.0 += 1;
        if self.cursor.0 >= self.width {
            self.next_line();
        }
    }

    fn next_line(&mut self) {
        self.cursor.0 = 0;
        self.cursor.1 += 1;
        if self.cursor.1 >= self.height {
            self.cursor.1 = self.height - 1;
            self.scroll();
        }
    }

    fn scroll(&mut self) {
        self.cells.drain(..self.width);
        self.cells
            .extend(std::iter::repeat(Cell::BLANK).take(self.width));
    }
}

/// A shared [`TextGrid`] wired to a guest session.
///
/// Clones share the grid, so one clone can feed the output sink while
/// another is installed as a function provider.
#[derive(Debug, Clone)]
pub struct TextConsole {
    grid: Arc<Mutex<TextGrid>>,
}

impl TextConsole {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            grid: Arc::new(Mutex::new(TextGrid::new(width, height))),
        }
    }

    /// A sink for [`Hooks::on_output`](crate::runtime::Hooks::on_output).
    pub fn output_sink(&self) -> impl Fn(u32) + Send + Sync + 'static {
        let console = self.clone();
        move |code_point| console.lock().putch32(code_point)
    }

    pub fn with_grid<R>(&self, f: impl FnOnce(&mut TextGrid) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn render(&self) -> String {
        self.lock().render()
    }

    fn lock(&self) -> MutexGuard<'_, TextGrid> {
        // A panic while holding the lock leaves the grid consistent.
        self.grid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_screen(&self, statement: &str, screen: i32, f: impl FnOnce(&mut TextGrid)) {
        if !(0..=4).contains(&screen) {
            warn!(statement, screen, "text screen out of range");
            return;
        }
        self.with_grid(f);
    }
}

impl FunctionProvider for TextConsole {
    fn external_functions(&self) -> Vec<ExternalFunction> {
        let cls = self.clone();
        let cls_screen = self.clone();
        let color = self.clone();
        let color_screen = self.clone();
        vec![
            ExternalFunction::procedure0("CLS", move |_| {
                cls.on_screen("CLS", DEFAULT_TEXT_SCREEN, TextGrid::clear);
                Ok(())
            }),
            ExternalFunction::procedure1("CLS", move |_, screen: i32| {
                cls_screen.on_screen("CLS", screen, TextGrid::clear);
                Ok(())
            }),
            ExternalFunction::procedure1("COLOR", move |_, rgba: i32| {
                color.on_screen("COLOR", DEFAULT_TEXT_SCREEN, |grid| {
                    grid.set_color(rgba as u32)
                });
                Ok(())
            }),
            ExternalFunction::new(
                "COLOR",
                vec![TypeTag::Int32, TypeTag::Int32],
                move |ctx, args| {
                    let (Some(screen), Some(rgba)) = (
                        args.first().and_then(|v| v.as_i32()),
                        args.get(1).and_then(|v| v.as_i32()),
                    ) else {
                        return Err(ctx.fail("expected (screen, rgba)"));
                    };
                    color_screen.on_screen("COLOR", screen, |grid| grid.set_color(rgba as u32));
                    Ok(())
                },
            ),
        ]
    }
}
