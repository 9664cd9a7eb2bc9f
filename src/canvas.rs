//! Drawing surface used by the keyboard renderer.
//!
//! The [`Canvas`] trait is a small cairo-like vocabulary: paths built from
//! lines and cubic Béziers, stroked and filled in solid colors, plus text
//! placed on a baseline. [`RasterCanvas`] implements it on an RGB image.

use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Straight segments used per cubic when flattening.
const CURVE_STEPS: usize = 16;

/// Fonts tried when no font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("read font '{path}': {source}")]
    FontIo { path: PathBuf, source: std::io::Error },
    #[error("parse font '{path}': {message}")]
    FontParse { path: PathBuf, message: &'static str },
    #[error("write image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// An outline made of one or more subpaths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::MoveTo(x, y));
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::LineTo(x, y));
    }

    pub fn curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) {
        self.segments.push(Segment::CurveTo(x1, y1, x2, y2, x3, y3));
    }

    pub fn close(&mut self) {
        self.segments.push(Segment::Close);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Convert to polylines, returning each subpath and whether it is closed.
    pub fn flatten(&self) -> Vec<(Vec<(f64, f64)>, bool)> {
        let mut out = Vec::new();
        let mut current: Vec<(f64, f64)> = Vec::new();
        for seg in &self.segments {
            match *seg {
                Segment::MoveTo(x, y) => {
                    if current.len() > 1 {
                        out.push((std::mem::take(&mut current), false));
                    }
                    current.clear();
                    current.push((x, y));
                }
                Segment::LineTo(x, y) => current.push((x, y)),
                Segment::CurveTo(x1, y1, x2, y2, x3, y3) => {
                    let (x0, y0) = current.last().copied().unwrap_or((x1, y1));
                    for step in 1..=CURVE_STEPS {
                        let t = step as f64 / CURVE_STEPS as f64;
                        let mt = 1.0 - t;
                        let a = mt * mt * mt;
                        let b = 3.0 * mt * mt * t;
                        let c = 3.0 * mt * t * t;
                        let d = t * t * t;
                        current.push((
                            a * x0 + b * x1 + c * x2 + d * x3,
                            a * y0 + b * y1 + c * y2 + d * y3,
                        ));
                    }
                }
                Segment::Close => {
                    if !current.is_empty() {
                        let start = current[0];
                        out.push((std::mem::take(&mut current), true));
                        current.push(start);
                    }
                }
            }
        }
        if current.len() > 1 {
            out.push((current, false));
        }
        out
    }
}

/// Vertical font metrics, positive distances from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FontExtents {
    pub ascent: f64,
    pub descent: f64,
}

/// Ink bounds of a string relative to its origin on the baseline (y grows down).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextExtents {
    pub x_bearing: f64,
    pub y_bearing: f64,
    pub width: f64,
    pub height: f64,
    pub x_advance: f64,
}

pub trait Canvas {
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Rgb<u8>);

    /// Stroke with a one pixel wide line.
    fn stroke_path(&mut self, path: &Path, color: Rgb<u8>);

    fn fill_path(&mut self, path: &Path, color: Rgb<u8>);

    fn font_extents(&self, size: f64) -> FontExtents;

    fn text_extents(&self, text: &str, size: f64) -> TextExtents;

    /// Draw `text` with its origin on the baseline at (x, y).
    fn show_text(&mut self, x: f64, y: f64, text: &str, size: f64, color: Rgb<u8>);
}

/// Software canvas over an [`RgbImage`].
pub struct RasterCanvas {
    image: RgbImage,
    font: Option<Arc<Font>>,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { image: RgbImage::new(width, height), font: None }
    }

    /// Use `font` for labels. Without a font, text is measured as empty and not drawn.
    pub fn with_font(mut self, font: Option<Arc<Font>>) -> Self {
        self.font = font;
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn save_png(&self, path: &FsPath) -> Result<(), CanvasError> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn blend(&mut self, x: i64, y: i64, color: Rgb<u8>, alpha: u8) {
        if x < 0 || y < 0 || x as u32 >= self.image.width() || y as u32 >= self.image.height() {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        let a = alpha as u32;
        for i in 0..3 {
            dst.0[i] = ((color.0[i] as u32 * a + dst.0[i] as u32 * (255 - a) + 127) / 255) as u8;
        }
    }
}

impl Canvas for RasterCanvas {
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Rgb<u8>) {
        let x0 = x.round() as i64;
        let y0 = y.round() as i64;
        let x1 = (x + width).round() as i64;
        let y1 = (y + height).round() as i64;
        for py in y0..y1 {
            for px in x0..x1 {
                self.put(px, py, color);
            }
        }
    }

    fn stroke_path(&mut self, path: &Path, color: Rgb<u8>) {
        for (points, closed) in path.flatten() {
            let mut edges: Vec<((f64, f64), (f64, f64))> = points.windows(2).map(|w| (w[0], w[1])).collect();
            if closed && points.len() > 1 {
                edges.push((points[points.len() - 1], points[0]));
            }
            for (a, b) in edges {
                let min_x = a.0.min(b.0).floor() as i64 - 1;
                let max_x = a.0.max(b.0).ceil() as i64 + 1;
                let min_y = a.1.min(b.1).floor() as i64 - 1;
                let max_y = a.1.max(b.1).ceil() as i64 + 1;
                for py in min_y..=max_y {
                    for px in min_x..=max_x {
                        let center = (px as f64 + 0.5, py as f64 + 0.5);
                        if segment_distance(center, a, b) <= 0.5 + 1e-9 {
                            self.put(px, py, color);
                        }
                    }
                }
            }
        }
    }

    fn fill_path(&mut self, path: &Path, color: Rgb<u8>) {
        // Even-odd scanline fill sampled at pixel centers.
        let polygons: Vec<Vec<(f64, f64)>> = path.flatten().into_iter().map(|(p, _)| p).collect();
        let points = polygons.iter().flatten();
        let (min_y, max_y) = points.fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
        if min_y > max_y {
            return;
        }

        let mut crossings = Vec::new();
        for py in min_y.floor() as i64..=max_y.ceil() as i64 {
            let yc = py as f64 + 0.5;
            crossings.clear();
            for poly in &polygons {
                for i in 0..poly.len() {
                    let (x0, y0) = poly[i];
                    let (x1, y1) = poly[(i + 1) % poly.len()];
                    if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                        crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
                    }
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for span in crossings.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil() as i64;
                let end = (span[1] - 0.5).ceil() as i64;
                for px in start..end {
                    self.put(px, py, color);
                }
            }
        }
    }

    fn font_extents(&self, size: f64) -> FontExtents {
        let Some(font) = &self.font else {
            return FontExtents::default();
        };
        match font.horizontal_line_metrics(size as f32) {
            Some(m) => FontExtents { ascent: m.ascent as f64, descent: -m.descent as f64 },
            None => FontExtents { ascent: size, descent: 0.0 },
        }
    }

    fn text_extents(&self, text: &str, size: f64) -> TextExtents {
        let Some(font) = &self.font else {
            return TextExtents::default();
        };
        let mut pen = 0.0f64;
        let (mut left, mut right) = (f64::MAX, f64::MIN);
        let (mut top, mut bottom) = (f64::MAX, f64::MIN);
        for c in text.chars() {
            let m = font.metrics(c, size as f32);
            if m.width > 0 && m.height > 0 {
                let gx = pen + m.xmin as f64;
                let gy = -(m.ymin as f64 + m.height as f64);
                left = left.min(gx);
                right = right.max(gx + m.width as f64);
                top = top.min(gy);
                bottom = bottom.max(gy + m.height as f64);
            }
            pen += m.advance_width as f64;
        }
        if left > right {
            return TextExtents { x_advance: pen, ..TextExtents::default() };
        }
        TextExtents {
            x_bearing: left,
            y_bearing: top,
            width: right - left,
            height: bottom - top,
            x_advance: pen,
        }
    }

    fn show_text(&mut self, x: f64, y: f64, text: &str, size: f64, color: Rgb<u8>) {
        let Some(font) = self.font.clone() else {
            return;
        };
        let mut pen = x;
        for c in text.chars() {
            let (m, bitmap) = font.rasterize(c, size as f32);
            let gx = (pen + m.xmin as f64).round() as i64;
            let gy = (y - (m.ymin as f64 + m.height as f64)).round() as i64;
            for row in 0..m.height {
                for col in 0..m.width {
                    let alpha = bitmap[row * m.width + col];
                    if alpha > 0 {
                        self.blend(gx + col as i64, gy + row as i64, color, alpha);
                    }
                }
            }
            pen += m.advance_width as f64;
        }
    }
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

/// Load a TrueType/OpenType font from disk.
pub fn load_font(path: &FsPath) -> Result<Font, CanvasError> {
    let bytes = std::fs::read(path).map_err(|source| CanvasError::FontIo { path: path.to_path_buf(), source })?;
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|message| CanvasError::FontParse { path: path.to_path_buf(), message })
}

/// First well-known sans-serif font present on this system.
pub fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONTS.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn square(x: f64, y: f64, w: f64, h: f64) -> Path {
        let mut p = Path::new();
        p.move_to(x, y);
        p.line_to(x + w, y);
        p.line_to(x + w, y + h);
        p.line_to(x, y + h);
        p.close();
        p
    }

    #[test]
    fn fill_rect_covers_exact_pixels() {
        let mut c = RasterCanvas::new(8, 8);
        c.fill_rect(2.0, 3.0, 2.0, 1.0, RED);
        let img = c.image();
        assert_eq!(*img.get_pixel(2, 3), RED);
        assert_eq!(*img.get_pixel(3, 3), RED);
        assert_eq!(*img.get_pixel(4, 3), BLACK);
        assert_eq!(*img.get_pixel(2, 4), BLACK);
    }

    #[test]
    fn fill_path_covers_interior_only() {
        let mut c = RasterCanvas::new(10, 10);
        c.fill_path(&square(2.0, 2.0, 4.0, 3.0), RED);
        let filled = c.image().pixels().filter(|p| **p == RED).count();
        assert_eq!(filled, 12);
        assert_eq!(*c.image().get_pixel(2, 2), RED);
        assert_eq!(*c.image().get_pixel(5, 4), RED);
        assert_eq!(*c.image().get_pixel(6, 4), BLACK);
    }

    #[test]
    fn stroke_then_fill_leaves_outline_outside_cell() {
        let mut c = RasterCanvas::new(12, 12);
        let p = square(3.0, 3.0, 5.0, 5.0);
        c.stroke_path(&p, BLUE);
        c.fill_path(&p, RED);
        let img = c.image();
        assert_eq!(*img.get_pixel(2, 5), BLUE);
        assert_eq!(*img.get_pixel(8, 5), BLUE);
        assert_eq!(*img.get_pixel(5, 2), BLUE);
        assert_eq!(*img.get_pixel(5, 8), BLUE);
        assert_eq!(*img.get_pixel(3, 3), RED);
        assert_eq!(*img.get_pixel(7, 7), RED);
        assert_eq!(*img.get_pixel(0, 0), BLACK);
    }

    #[test]
    fn curves_flatten_to_endpoint() {
        let mut p = Path::new();
        p.move_to(0.0, 5.0);
        p.curve_to(0.0, 0.0, 0.0, 0.0, 5.0, 0.0);
        p.close();
        let subpaths = p.flatten();
        assert_eq!(subpaths.len(), 1);
        let (points, closed) = &subpaths[0];
        assert!(*closed);
        assert_eq!(points.len(), 1 + CURVE_STEPS);
        let last = points[points.len() - 1];
        assert!((last.0 - 5.0).abs() < 1e-9 && last.1.abs() < 1e-9);
    }

    #[test]
    fn text_without_font_is_empty_and_not_drawn() {
        let mut c = RasterCanvas::new(16, 16);
        assert_eq!(c.text_extents("Esc", 12.0), TextExtents::default());
        assert_eq!(c.font_extents(12.0), FontExtents::default());
        c.show_text(1.0, 12.0, "Esc", 12.0, RED);
        assert!(c.image().pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = load_font(FsPath::new("/nonexistent/font.ttf")).unwrap_err();
        assert!(matches!(err, CanvasError::FontIo { .. }));
        assert!(err.to_string().contains("/nonexistent/font.ttf"));
    }

    #[test]
    fn invalid_font_data_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(matches!(load_font(&path), Err(CanvasError::FontParse { .. })));
    }
}
