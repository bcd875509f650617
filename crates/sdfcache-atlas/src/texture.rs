//! CPU-side atlas textures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sdfcache_formats::PixelFormat;

use crate::traits::{AtlasTexture, TextureAllocator};
use crate::{AtlasError, Result};

/// Texture stored in main memory.
#[derive(Debug)]
pub struct CpuTexture {
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    texels: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl CpuTexture {
    /// Raw texel bytes, row major.
    pub fn texels(&self) -> &[u8] {
        &self.texels
    }

    /// Bytes of the texel at (`x`, `y`).
    pub fn texel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel;
        self.texels.get(start..start + self.bytes_per_pixel)
    }

    /// Whether every texel is zero.
    pub fn is_blank(&self) -> bool {
        self.texels.iter().all(|&b| b == 0)
    }
}

impl AtlasTexture for CpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn write_region(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u8]) {
        let row_bytes = width as usize * self.bytes_per_pixel;
        let stride = self.width as usize * self.bytes_per_pixel;
        let rows = height.min(self.height.saturating_sub(y)) as usize;
        let copy = row_bytes.min((self.width.saturating_sub(x)) as usize * self.bytes_per_pixel);

        for (row, src) in pixels.chunks_exact(row_bytes.max(1)).take(rows).enumerate() {
            let start = (y as usize + row) * stride + x as usize * self.bytes_per_pixel;
            if let Some(dst) = self.texels.get_mut(start..start + copy) {
                dst.copy_from_slice(&src[..copy]);
            }
        }
    }

    fn clear(&mut self) {
        self.texels.fill(0);
    }
}

impl Drop for CpuTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Allocates [`CpuTexture`]s and counts how many are alive.
#[derive(Debug, Default)]
pub struct CpuTextureAllocator {
    live: Arc<AtomicUsize>,
    max_textures: Option<usize>,
}

impl CpuTextureAllocator {
    /// Unlimited allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses to hold more than `max` textures at once.
    pub fn with_limit(max: usize) -> Self {
        Self {
            live: Arc::default(),
            max_textures: Some(max),
        }
    }

    /// Textures allocated and not yet dropped.
    pub fn live_textures(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl TextureAllocator for CpuTextureAllocator {
    type Texture = CpuTexture;

    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Result<CpuTexture> {
        if self
            .max_textures
            .is_some_and(|max| self.live_textures() >= max)
        {
            return Err(AtlasError::TextureCreation {
                width,
                height,
                reason: "texture limit reached".into(),
            });
        }
        let bytes_per_pixel = format.bytes_per_pixel();
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(bytes_per_pixel))
            .ok_or_else(|| AtlasError::TextureCreation {
                width,
                height,
                reason: "size overflows".into(),
            })?;

        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(CpuTexture {
            width,
            height,
            bytes_per_pixel,
            texels: vec![0; len],
            live: Arc::clone(&self.live),
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_write_region_places_rows() {
        let allocator = CpuTextureAllocator::new();
        let mut texture = allocator
            .allocate(8, 8, PixelFormat::Rgba8)
            .expect("allocate");
        let pixels: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8 + 1).collect();
        texture.write_region(5, 2, 2, 3, &pixels);

        assert_eq!(texture.texel(5, 2), Some(&[1, 2, 3, 4][..]));
        assert_eq!(texture.texel(6, 4), Some(&[21, 22, 23, 24][..]));
        assert_eq!(texture.texel(4, 2), Some(&[0, 0, 0, 0][..]));
        assert_eq!(texture.texel(8, 0), None);

        texture.clear();
        assert!(texture.is_blank());
    }

    #[test]
    fn test_write_region_clips_at_edges() {
        let allocator = CpuTextureAllocator::new();
        let mut texture = allocator
            .allocate(4, 4, PixelFormat::Rgba8)
            .expect("allocate");
        texture.write_region(3, 3, 2, 2, &[0xFF; 16]);
        assert_eq!(texture.texel(3, 3), Some(&[0xFF; 4][..]));
        assert_eq!(texture.texels().iter().filter(|&&b| b != 0).count(), 4);
    }

    #[test]
    fn test_textures_released_once() {
        let allocator = CpuTextureAllocator::with_limit(2);
        let a = allocator.allocate(4, 4, PixelFormat::Rgba16).expect("a");
        let b = allocator.allocate(4, 4, PixelFormat::Rgba16).expect("b");
        assert_eq!(a.texels().len(), 4 * 4 * 8);
        assert_eq!(allocator.live_textures(), 2);
        assert!(matches!(
            allocator.allocate(4, 4, PixelFormat::Rgba16),
            Err(AtlasError::TextureCreation { .. })
        ));

        drop(a);
        assert_eq!(allocator.live_textures(), 1);
        drop(b);
        assert_eq!(allocator.live_textures(), 0);
    }
}
