//! Key state renderer for a validated layout.

use crate::canvas::{Canvas, Path};
use crate::key_state::{KeyState, KeyStateStore, StateError, KEY_CNT};
use crate::layout::{LayoutError, LayoutSpec, Metrics};
use image::Rgb;

pub const BACKGROUND: Rgb<u8> = Rgb([244, 239, 239]);
pub const OUTLINE: Rgb<u8> = Rgb([0, 0, 0]);
pub const LABEL: Rgb<u8> = Rgb([0, 0, 0]);

/// Cell fill for each key state.
pub fn state_color(state: KeyState) -> Rgb<u8> {
    match state {
        KeyState::Released => Rgb([255, 255, 255]),
        KeyState::Pressed => Rgb([214, 194, 194]),
        KeyState::Held => Rgb([194, 163, 163]),
    }
}

/// A layout bound to its own key state table.
///
/// Construction validates the layout; a `Keyboard` only exists for layouts
/// that satisfy every grid invariant.
#[derive(Debug)]
pub struct Keyboard {
    layout: LayoutSpec,
    metrics: Metrics,
    state: KeyStateStore,
}

impl Keyboard {
    /// Create a keyboard over the full Linux key code range.
    pub fn new(layout: LayoutSpec) -> Result<Self, LayoutError> {
        Self::with_capacity(layout, KEY_CNT)
    }

    /// Create a keyboard whose state table holds `capacity` codes.
    pub fn with_capacity(layout: LayoutSpec, capacity: usize) -> Result<Self, LayoutError> {
        let metrics = layout.validate(capacity)?;
        Ok(Self { layout, metrics, state: KeyStateStore::new(capacity) })
    }

    pub fn layout(&self) -> &LayoutSpec {
        &self.layout
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn width(&self) -> u32 {
        self.metrics.width
    }

    pub fn height(&self) -> u32 {
        self.metrics.height
    }

    pub fn rows(&self) -> u32 {
        self.metrics.rows
    }

    /// Set the callback invoked whenever a key state change needs a redraw.
    ///
    /// Not called for the initial draw. It may run on any thread, including
    /// the device watcher's, so it should return quickly.
    pub fn set_redraw_callback<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state.set_callback(Some(Box::new(callback)));
    }

    pub fn clear_redraw_callback(&mut self) {
        self.state.set_callback(None);
    }

    /// Record a key transition, returning whether it changed anything.
    pub fn set_state(&self, code: u16, state: KeyState) -> Result<bool, StateError> {
        self.state.set(code, state)
    }

    pub fn state(&self, code: u16) -> Result<KeyState, StateError> {
        self.state.get(code)
    }

    /// Render the current key states.
    ///
    /// The canvas is expected to be `width() x height()`. Equal key states
    /// produce identical output.
    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C) {
        let m = &self.metrics;
        canvas.fill_rect(0.0, 0.0, m.width as f64, m.height as f64, BACKGROUND);

        let font_size = m.font_size as f64;
        let font = canvas.font_extents(font_size);

        for cell in self.layout.cells(m) {
            let Some(label) = cell.key.label.as_deref() else {
                continue;
            };
            // Labeled keys carry a code, range checked at construction.
            let state = cell.key.code.and_then(|code| self.state.get(code).ok()).unwrap_or_default();

            let (x, y) = (cell.x as f64, cell.y as f64);
            let (w, h) = (cell.width as f64, cell.height as f64);
            let outline = rounded_rect(x, y, w, h, m.curve_radius as f64);
            canvas.stroke_path(&outline, OUTLINE);
            canvas.fill_path(&outline, state_color(state));

            let text = canvas.text_extents(label, font_size);
            let tx = x + 0.5 + w / 2.0 - text.x_bearing - text.width / 2.0;
            let ty = y + 0.5 + h / 2.0 + m.padding as f64 - font.descent + text.height / 2.0;
            canvas.show_text(tx, ty, label, font_size, LABEL);
        }
    }
}

/// Corner treatment of a key cell, decided by the radius against the half extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    /// Four rounded corners joined by straight edges.
    Rounded,
    /// Too narrow for the radius: semicircular top and bottom.
    VerticalStadium,
    /// Too short for the radius: semicircular left and right ends.
    HorizontalStadium,
    /// Both axes collapse into an ellipse.
    Ellipse,
}

impl CellShape {
    pub fn classify(w: f64, h: f64, r: f64) -> Self {
        match (w / 2.0 < r, h / 2.0 < r) {
            (false, false) => CellShape::Rounded,
            (true, false) => CellShape::VerticalStadium,
            (false, true) => CellShape::HorizontalStadium,
            (true, true) => CellShape::Ellipse,
        }
    }
}

/// Outline of a key cell with corners curved toward `r`.
///
/// A corner whose radius exceeds the half extent on an axis is clamped to
/// meet at that axis's midpoint, degenerating into a stadium or an ellipse.
pub fn rounded_rect(x: f64, y: f64, w: f64, h: f64, r: f64) -> Path {
    let shape = CellShape::classify(w, h, r);
    let rx = match shape {
        CellShape::VerticalStadium | CellShape::Ellipse => w / 2.0,
        _ => r,
    };
    let ry = match shape {
        CellShape::HorizontalStadium | CellShape::Ellipse => h / 2.0,
        _ => r,
    };
    let (right, bottom) = (x + w, y + h);

    let mut p = Path::new();
    p.move_to(x, y + ry);
    p.curve_to(x, y, x, y, x + rx, y);
    if right - rx > x + rx {
        p.line_to(right - rx, y);
    }
    p.curve_to(right, y, right, y, right, y + ry);
    if bottom - ry > y + ry {
        p.line_to(right, bottom - ry);
    }
    p.curve_to(right, bottom, right, bottom, right - rx, bottom);
    if right - rx > x + rx {
        p.line_to(x + rx, bottom);
    }
    p.curve_to(x, bottom, x, bottom, x, bottom - ry);
    p.close();
    p
}
