//! Cache key identifying one cache instance

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};

/// Pixel layout of stored distance-field bitmaps.
///
/// The numeric codes are the texture format identifiers stored in the
/// cache key, so they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8 bits per channel, RGBA (MSDF in RGB, true SDF in alpha)
    #[default]
    Rgba8,
    /// 16 bits per channel, RGBA
    Rgba16,
}

impl PixelFormat {
    /// Format code stored on disk.
    pub const fn code(self) -> u32 {
        match self {
            Self::Rgba8 => 21,
            Self::Rgba16 => 36,
        }
    }

    /// Decode a stored format code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            21 => Some(Self::Rgba8),
            36 => Some(Self::Rgba16),
            _ => None,
        }
    }

    /// Bytes per pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 => 8,
        }
    }
}

/// Parameters that make cached bitmaps interchangeable.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Render size in pixels |
/// | 0x04   | 4    | Distance-field spread in pixels |
/// | 0x08   | 4    | Pixel format code |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BinRead, BinWrite)]
#[brw(little)]
pub struct CacheKey {
    /// Glyph render size in pixels
    pub render_size: u32,
    /// Distance-field spread in pixels
    pub spread: u32,
    /// Pixel format code (see [`PixelFormat::code`])
    pub pixel_format: u32,
}

/// Serialized size of [`CacheKey`].
pub const CACHE_KEY_SIZE: usize = 12;

impl CacheKey {
    /// Create a key from its parameters.
    pub const fn new(render_size: u32, spread: u32, format: PixelFormat) -> Self {
        Self {
            render_size,
            spread,
            pixel_format: format.code(),
        }
    }

    /// Decoded pixel format, if the stored code is known.
    pub const fn format(&self) -> Option<PixelFormat> {
        PixelFormat::from_code(self.pixel_format)
    }

    /// Largest bitmap edge a glyph can have: the render size plus the
    /// spread on both sides.
    pub const fn max_glyph_dimension(&self) -> u32 {
        self.render_size.saturating_add(self.spread.saturating_mul(2))
    }

    /// Largest bitmap a glyph can occupy, in bytes.
    pub const fn max_glyph_bytes(&self) -> usize {
        let dim = self.max_glyph_dimension() as usize;
        let bpp = match self.format() {
            Some(format) => format.bytes_per_pixel(),
            None => 8,
        };
        dim * dim * bpp
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use binrw::{BinReaderExt, BinWriterExt};
    use std::io::Cursor;

    #[test]
    fn test_pixel_format_codes() {
        for format in [PixelFormat::Rgba8, PixelFormat::Rgba16] {
            assert_eq!(PixelFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(PixelFormat::from_code(0), None);
    }

    #[test]
    fn test_key_layout() {
        let key = CacheKey::new(64, 8, PixelFormat::Rgba8);
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&key).expect("write");
        let bytes = cursor.into_inner();
        assert_eq!(bytes.len(), CACHE_KEY_SIZE);
        assert_eq!(&bytes[0..4], &64u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &21u32.to_le_bytes());

        let parsed: CacheKey = Cursor::new(bytes).read_le().expect("read");
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_max_glyph_bytes() {
        let key = CacheKey::new(64, 8, PixelFormat::Rgba8);
        assert_eq!(key.max_glyph_dimension(), 80);
        assert_eq!(key.max_glyph_bytes(), 80 * 80 * 4);

        let wide = CacheKey::new(64, 8, PixelFormat::Rgba16);
        assert_eq!(wide.max_glyph_bytes(), 80 * 80 * 8);
    }
}
