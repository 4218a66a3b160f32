//! InkRelay Render Library
//!
//! Implementations of the core [`inkrelay_core::Renderer`] capability.
//! The default implementation rasterizes on the CPU into an RGBA buffer.

mod pixmap;

pub use pixmap::{PixmapRenderer, RenderResult, RendererError};
