//! Renderer capability consumed by reconstruction.

use crate::operation::StrokeChunk;

/// Trait for rasterizing backends.
///
/// The core never inspects pixels: it only draws chunks, and captures and
/// restores whole rasters as opaque values.
pub trait Renderer {
    /// Opaque full-canvas pixel buffer.
    type Raster;

    /// Rasterize one chunk on top of the current canvas.
    fn draw_chunk(&mut self, chunk: &StrokeChunk);

    /// Copy out the current canvas.
    fn capture_raster(&self) -> Self::Raster;

    /// Replace the current canvas with `raster`.
    fn blit_raster(&mut self, raster: &Self::Raster);

    /// Reset the canvas to empty.
    fn clear(&mut self);
}
