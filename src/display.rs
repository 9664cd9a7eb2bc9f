//! Terminal display surface: repaints the keyboard as half-block pixels.

use crate::canvas::RasterCanvas;
use crate::keyboard::Keyboard;
use crate::terminal::{rgb, Terminal};
use crossterm::event::{KeyCode, KeyModifiers};
use fontdue::Font;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coalescing repaint request. Any number of requests before the next
/// repaint collapse into one.
#[derive(Debug, Clone, Default)]
pub struct RepaintRequest(Arc<AtomicBool>);

impl RepaintRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a repaint. Cheap and callable from any thread.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume a pending request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Render one frame at exactly the keyboard's size.
pub fn render_frame(keyboard: &Keyboard, font: Option<Arc<Font>>) -> RgbImage {
    let mut canvas = RasterCanvas::new(keyboard.width(), keyboard.height()).with_font(font);
    keyboard.draw(&mut canvas);
    canvas.into_image()
}

/// Largest size that fits `cols x rows*2` pixels, keeping aspect and never upscaling.
pub fn fit_dimensions(img_w: u32, img_h: u32, cols: u16, rows: u16) -> (u32, u32) {
    if img_w == 0 || img_h == 0 || cols == 0 || rows == 0 {
        return (0, 0);
    }
    let max_w = cols as u64;
    let max_h = rows as u64 * 2;
    let (w, h) = (img_w as u64, img_h as u64);
    if w <= max_w && h <= max_h {
        return (img_w, img_h);
    }
    if w * max_h >= h * max_w {
        (max_w as u32, ((h * max_w / w) as u32).max(1))
    } else {
        (((w * max_h / h) as u32).max(1), max_h as u32)
    }
}

/// Draw `frame` centered using upper half blocks: fg is the top pixel, bg the bottom.
pub fn render_halfblock(term: &mut Terminal, frame: &RgbImage) {
    let (cols, rows) = term.size();
    let x_offset = (cols as u32).saturating_sub(frame.width()) / 2;
    let cells_h = frame.height().div_ceil(2);
    let y_offset = (rows as u32).saturating_sub(cells_h) / 2;

    for cy in 0..cells_h {
        for cx in 0..frame.width() {
            let top = frame.get_pixel(cx, cy * 2).0;
            let tx = (x_offset + cx) as i32;
            let ty = (y_offset + cy) as i32;
            let top_color = Some(rgb(top[0], top[1], top[2]));
            if cy * 2 + 1 < frame.height() {
                let bot = frame.get_pixel(cx, cy * 2 + 1).0;
                term.set_with_bg(tx, ty, '▀', top_color, Some(rgb(bot[0], bot[1], bot[2])));
            } else {
                term.set_with_bg(tx, ty, '▀', top_color, None);
            }
        }
    }
}

/// Run the display until q, Esc or Ctrl-C.
///
/// The keyboard is redrawn whenever `repaint` has a pending request or the
/// terminal size changes.
pub fn run(
    term: &mut Terminal,
    keyboard: &Keyboard,
    repaint: &RepaintRequest,
    font: Option<Arc<Font>>,
    time_step: f32,
) -> io::Result<()> {
    let (mut prev_w, mut prev_h) = term.size();
    repaint.request();

    loop {
        if let Some((code, mods)) = term.check_key()? {
            let quit = matches!(code, KeyCode::Char('q') | KeyCode::Esc)
                || (code == KeyCode::Char('c') && mods.contains(KeyModifiers::CONTROL));
            if quit {
                break;
            }
        }

        let (width, height) = crossterm::terminal::size().unwrap_or(term.size());
        if width != prev_w || height != prev_h {
            term.resize(width, height);
            term.clear_screen()?;
            prev_w = width;
            prev_h = height;
            repaint.request();
        }

        if repaint.take() {
            let frame = render_frame(keyboard, font.clone());
            let (w, h) = fit_dimensions(frame.width(), frame.height(), width, height);
            term.clear();
            if w > 0 && h > 0 {
                let scaled = if (w, h) == frame.dimensions() {
                    frame
                } else {
                    imageops::resize(&frame, w, h, FilterType::Triangle)
                };
                render_halfblock(term, &scaled);
            }
            term.present()?;
        }

        term.sleep(time_step);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repaint_requests_coalesce() {
        let repaint = RepaintRequest::new();
        assert!(!repaint.take());
        let other = repaint.clone();
        repaint.request();
        other.request();
        assert!(repaint.take());
        assert!(!other.take());
    }

    #[test]
    fn fit_never_upscales() {
        assert_eq!(fit_dimensions(36, 36, 200, 100), (36, 36));
    }

    #[test]
    fn fit_keeps_aspect_when_shrinking() {
        // 456x216 into 114 cols: width-bound at scale 0.25
        assert_eq!(fit_dimensions(456, 216, 114, 100), (114, 54));
        // height-bound: 20 rows = 40 pixels
        assert_eq!(fit_dimensions(456, 216, 400, 20), (84, 40));
    }

    #[test]
    fn fit_empty_terminal() {
        assert_eq!(fit_dimensions(10, 10, 0, 5), (0, 0));
    }
}
