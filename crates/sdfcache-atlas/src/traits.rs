//! Collaborator seams: rasterization, textures and font validation.
//!
//! The glyph cache never rasterizes, draws or inspects outlines itself.
//! Hosts plug those in through the traits below; [`CpuTextureAllocator`]
//! is a headless texture implementation for tools and tests.
//!
//! [`CpuTextureAllocator`]: crate::CpuTextureAllocator

#![allow(missing_docs)]

use std::sync::Arc;

use sdfcache_formats::PixelFormat;

use crate::Result;

/// Output of one rasterization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RasterizedGlyph {
    /// Bitmap width in pixels; 0 for glyphs without an outline
    pub width: u16,
    /// Bitmap height in pixels
    pub height: u16,
    /// Distance from the baseline to the bitmap top
    pub bitmap_top: i16,
    /// Distance from the pen position to the bitmap left edge
    pub bitmap_left: i16,
    /// Row-major pixels, `width * height * bytes_per_pixel` long
    pub pixels: Vec<u8>,
}

impl RasterizedGlyph {
    /// Metrics-only glyph such as a space.
    pub const fn empty(bitmap_top: i16, bitmap_left: i16) -> Self {
        Self {
            width: 0,
            height: 0,
            bitmap_top,
            bitmap_left,
            pixels: Vec::new(),
        }
    }
}

/// Turns codepoints into distance-field bitmaps.
///
/// `None` means the font has no usable glyph for the codepoint; nothing is
/// cached for it.
pub trait Rasterizer {
    fn rasterize(&mut self, codepoint: u32) -> Option<RasterizedGlyph>;
}

impl<R: Rasterizer + ?Sized> Rasterizer for Box<R> {
    fn rasterize(&mut self, codepoint: u32) -> Option<RasterizedGlyph> {
        (**self).rasterize(codepoint)
    }
}

/// One atlas page texture.
///
/// The handle owns the underlying resource and releases it when dropped.
pub trait AtlasTexture {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Copy a tightly packed `width * height` pixel block to (`x`, `y`).
    fn write_region(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u8]);

    /// Zero every texel.
    fn clear(&mut self);
}

/// Creates atlas page textures.
pub trait TextureAllocator {
    type Texture: AtlasTexture;

    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Result<Self::Texture>;
}

impl<A: TextureAllocator + ?Sized> TextureAllocator for Arc<A> {
    type Texture = A::Texture;

    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Result<Self::Texture> {
        (**self).allocate(width, height, format)
    }
}

/// Font bytes plus the names used to locate its cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSource {
    /// Family name
    pub family: String,
    /// Style name
    pub style: String,
    /// Raw font file contents
    pub data: Arc<[u8]>,
    /// Face index inside a collection
    pub face_index: u32,
}

impl FontSource {
    /// Describe a font face.
    pub fn new(family: impl Into<String>, style: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            family: family.into(),
            style: style.into(),
            data: data.into(),
            face_index: 0,
        }
    }

    /// Select a face inside a font collection.
    #[must_use]
    pub const fn with_face_index(mut self, face_index: u32) -> Self {
        self.face_index = face_index;
        self
    }
}

/// Decides whether a font's outlines can be rendered as distance fields.
pub trait FontValidator {
    fn is_compatible(&self, font: &FontSource) -> bool;
}

impl<F: Fn(&FontSource) -> bool> FontValidator for F {
    fn is_compatible(&self, font: &FontSource) -> bool {
        self(font)
    }
}
