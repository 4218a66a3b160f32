//! CPU renderer over an RGBA8 pixel buffer.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use inkrelay_core::{Renderer, StrokeChunk, Tool};
use kurbo::{Point, Rect};
use peniko::Color;
use thiserror::Error;

/// Distance between successive brush stamps along a segment, in pixels.
const STAMP_SPACING: f64 = 0.5;
/// Wide brushes space stamps by this fraction of their radius instead.
const WIDE_STAMP_SPACING: f64 = 0.25;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Invalid canvas size: {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Software rasterizer with round brush caps and joins.
///
/// Brush chunks overwrite covered pixels with their color; eraser chunks
/// reset them to transparent. No blending is applied, so drawing the same
/// sequence of chunks always yields the same pixels.
#[derive(Debug, Clone)]
pub struct PixmapRenderer {
    canvas: RgbaImage,
}

impl PixmapRenderer {
    /// Create a transparent canvas of the given size.
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RendererError::InvalidSize { width, height });
        }
        Ok(Self {
            canvas: RgbaImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.canvas
    }

    /// RGBA pixel data (4 bytes per pixel, row-major).
    pub fn rgba_data(&self) -> &[u8] {
        self.canvas.as_raw()
    }

    /// Pixel at `(x, y)`, or `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.canvas.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Encode the current canvas as PNG.
    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| RendererError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    fn stamp(&mut self, center: Point, radius: f64, pixel: Rgba<u8>) {
        let (width, height) = self.canvas.dimensions();
        let x0 = (center.x - radius).floor().max(0.0) as u32;
        let y0 = (center.y - radius).floor().max(0.0) as u32;
        let x1 = ((center.x + radius).ceil().max(0.0) as u32).min(width);
        let y1 = ((center.y + radius).ceil().max(0.0) as u32).min(height);
        let r2 = radius * radius;

        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - center.x;
                let dy = y as f64 + 0.5 - center.y;
                if dx * dx + dy * dy <= r2 {
                    self.canvas.put_pixel(x, y, pixel);
                }
            }
        }
    }
}

/// Part of segment `a`-`b` inside `rect` (Liang-Barsky), if any.
fn clip_segment(a: Point, b: Point, rect: Rect) -> Option<(Point, Point)> {
    let d = b - a;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [
        (-d.x, a.x - rect.x0),
        (d.x, rect.x1 - a.x),
        (-d.y, a.y - rect.y0),
        (d.y, rect.y1 - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
        }
    }
    (t0 <= t1).then(|| (a.lerp(b, t0), a.lerp(b, t1)))
}

fn chunk_pixel(chunk: &StrokeChunk) -> Rgba<u8> {
    match chunk.tool {
        Tool::Brush => {
            let rgba = Color::from(chunk.color).to_rgba8();
            Rgba([rgba.r, rgba.g, rgba.b, rgba.a])
        }
        Tool::Eraser => Rgba([0, 0, 0, 0]),
    }
}

impl Renderer for PixmapRenderer {
    type Raster = RgbaImage;

    fn draw_chunk(&mut self, chunk: &StrokeChunk) {
        let pixel = chunk_pixel(chunk);
        let radius = (chunk.width / 2.0).max(0.5);
        let spacing = STAMP_SPACING.max(radius * WIDE_STAMP_SPACING);
        // Stamps centered outside this rect cannot touch the canvas.
        let reach = Rect::new(0.0, 0.0, self.width() as f64, self.height() as f64).inflate(radius, radius);

        match chunk.points.as_slice() {
            [] => {}
            [only] => self.stamp(*only, radius, pixel),
            points => {
                for pair in points.windows(2) {
                    let Some((a, b)) = clip_segment(pair[0], pair[1], reach) else {
                        continue;
                    };
                    let steps = (a.distance(b) / spacing).ceil().max(1.0) as usize;
                    for i in 0..=steps {
                        self.stamp(a.lerp(b, i as f64 / steps as f64), radius, pixel);
                    }
                }
            }
        }
    }

    fn capture_raster(&self) -> RgbaImage {
        self.canvas.clone()
    }

    fn blit_raster(&mut self, raster: &RgbaImage) {
        if raster.dimensions() == self.canvas.dimensions() {
            self.canvas.copy_from_slice(raster.as_raw());
        } else {
            log::warn!(
                "Blitting {:?} raster onto {:?} canvas",
                raster.dimensions(),
                self.canvas.dimensions()
            );
            self.canvas = raster.clone();
        }
    }

    fn clear(&mut self) {
        self.canvas.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkrelay_core::SerializableColor;

    const RED: SerializableColor = SerializableColor {
        r: 255,
        g: 0,
        b: 0,
        a: 255,
    };

    fn renderer() -> PixmapRenderer {
        PixmapRenderer::new(32, 32).unwrap()
    }

    #[test]
    fn test_invalid_size() {
        assert!(matches!(
            PixmapRenderer::new(0, 10),
            Err(RendererError::InvalidSize { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_dot_colors_center() {
        let mut r = renderer();
        r.draw_chunk(&StrokeChunk::from_points(vec![Point::new(10.5, 10.5)], RED, 4.0));
        assert_eq!(r.pixel(10, 10), Some([255, 0, 0, 255]));
        assert_eq!(r.pixel(20, 20), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_segment_covers_path() {
        let mut r = renderer();
        let chunk = StrokeChunk::from_points(vec![Point::new(2.0, 16.0), Point::new(30.0, 16.0)], RED, 2.0);
        r.draw_chunk(&chunk);
        for x in 2..30 {
            assert_eq!(r.pixel(x, 15), Some([255, 0, 0, 255]), "x = {x}");
        }
        assert_eq!(r.pixel(16, 5), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_eraser_clears_pixels() {
        let mut r = renderer();
        r.draw_chunk(&StrokeChunk::from_points(vec![Point::new(10.5, 10.5)], RED, 6.0));
        let eraser = StrokeChunk::from_points(vec![Point::new(10.5, 10.5)], RED, 2.0).with_tool(Tool::Eraser);
        r.draw_chunk(&eraser);
        assert_eq!(r.pixel(10, 10), Some([0, 0, 0, 0]));
        assert_eq!(r.pixel(12, 10), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_offscreen_points_are_clipped() {
        let mut r = renderer();
        let chunk = StrokeChunk::from_points(vec![Point::new(-40.0, -40.0), Point::new(100.0, 100.0)], RED, 2.0);
        r.draw_chunk(&chunk);
        assert_eq!(r.pixel(16, 16), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_huge_offscreen_segment_is_clipped() {
        let mut r = renderer();
        let chunk = StrokeChunk::from_points(vec![Point::new(0.0, 16.0), Point::new(1e12, 16.0)], RED, 2.0);
        r.draw_chunk(&chunk);
        assert_eq!(r.pixel(20, 15), Some([255, 0, 0, 255]));
        assert_eq!(r.pixel(20, 5), Some([0, 0, 0, 0]));

        let wide = StrokeChunk::from_points(vec![Point::new(-1e12, -1e12), Point::new(1e12, 1e12)], RED, 1e9);
        r.clear();
        r.draw_chunk(&wide);
        assert_eq!(r.pixel(0, 31), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_segment_missing_canvas_draws_nothing() {
        let mut r = renderer();
        let chunk = StrokeChunk::from_points(vec![Point::new(-1e12, -50.0), Point::new(1e12, -50.0)], RED, 4.0);
        r.draw_chunk(&chunk);
        assert!(r.rgba_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clip_segment() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        let (a, b) = clip_segment(Point::new(-10.0, 5.0), Point::new(30.0, 5.0), rect).unwrap();
        assert_eq!((a, b), (Point::new(0.0, 5.0), Point::new(10.0, 5.0)));
        assert!(clip_segment(Point::new(-5.0, -5.0), Point::new(-1.0, 20.0), rect).is_none());
        let inside = (Point::new(2.0, 2.0), Point::new(3.0, 4.0));
        assert_eq!(clip_segment(inside.0, inside.1, rect), Some(inside));
    }

    #[test]
    fn test_capture_and_blit() {
        let mut r = renderer();
        r.draw_chunk(&StrokeChunk::from_points(vec![Point::new(5.5, 5.5)], RED, 2.0));
        let raster = r.capture_raster();

        r.clear();
        assert_eq!(r.pixel(5, 5), Some([0, 0, 0, 0]));

        r.blit_raster(&raster);
        assert_eq!(r.pixel(5, 5), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_png_export_signature() {
        let r = renderer();
        let png = r.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
