//! Owned glyph bitmaps moving between rasterizer, batcher and disk.

use std::sync::Arc;

use sdfcache_formats::{GlyphBitmap, GlyphEntry};

/// A glyph bitmap with its placement metrics.
///
/// Pixels are reference counted so the same buffer can be staged for
/// writing and uploaded to an atlas without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRecord {
    /// Unicode codepoint
    pub codepoint: u32,
    /// Bitmap width in pixels
    pub width: u16,
    /// Bitmap height in pixels
    pub height: u16,
    /// Distance from the baseline to the bitmap top
    pub bitmap_top: i16,
    /// Distance from the pen position to the bitmap left edge
    pub bitmap_left: i16,
    /// Pixel bytes, row major
    pub pixels: Arc<[u8]>,
}

impl GlyphRecord {
    /// Create a record
    pub fn new(
        codepoint: u32,
        width: u16,
        height: u16,
        bitmap_top: i16,
        bitmap_left: i16,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            codepoint,
            width,
            height,
            bitmap_top,
            bitmap_left,
            pixels: pixels.into(),
        }
    }

    /// Copy an entry and its payload out of a mapped block.
    pub(crate) fn from_entry(entry: &GlyphEntry, pixels: &[u8]) -> Self {
        Self::new(
            entry.codepoint,
            entry.width,
            entry.height,
            entry.bitmap_top,
            entry.bitmap_left,
            pixels,
        )
    }

    /// Borrow as a block builder input.
    pub(crate) fn as_bitmap(&self) -> GlyphBitmap<'_> {
        GlyphBitmap {
            codepoint: self.codepoint,
            width: self.width,
            height: self.height,
            bitmap_top: self.bitmap_top,
            bitmap_left: self.bitmap_left,
            pixels: &self.pixels,
        }
    }
}
