//! Shelf-packed atlas pages with round-robin page eviction.
//!
//! Each page is filled row by row ("shelves"). A glyph goes into the
//! current row of the first page where it fits, otherwise it opens a new
//! row below if there is vertical room. When no page has room and the page
//! limit is reached, the oldest page is wiped and reused.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AtlasConfig;
use crate::traits::{AtlasTexture, TextureAllocator};
use crate::{AtlasError, Result};

/// Where a glyph landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasPlacement {
    /// Page index
    pub page: usize,
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Normalized left edge
    pub u0: f32,
    /// Normalized top edge
    pub v0: f32,
    /// Normalized right edge
    pub u1: f32,
    /// Normalized bottom edge
    pub v1: f32,
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// Placement of the new glyph
    pub placement: AtlasPlacement,
    /// Codepoints that lost their placement to make room
    pub evicted: Vec<u32>,
}

/// One texture page and its shelf cursor.
#[derive(Debug)]
pub struct AtlasPage<T> {
    texture: T,
    next_x: u32,
    next_y: u32,
    row_height: u32,
    codepoints: Vec<u32>,
}

impl<T: AtlasTexture> AtlasPage<T> {
    fn new(texture: T, gutter: u32) -> Self {
        Self {
            texture,
            next_x: gutter,
            next_y: gutter,
            row_height: 0,
            codepoints: Vec::new(),
        }
    }

    /// Page texture.
    pub const fn texture(&self) -> &T {
        &self.texture
    }

    /// Codepoints placed on this page, in upload order.
    pub fn codepoints(&self) -> &[u32] {
        &self.codepoints
    }

    /// Shelf cursor as (x, y, row height).
    pub const fn cursor(&self) -> (u32, u32, u32) {
        (self.next_x, self.next_y, self.row_height)
    }

    /// Move the cursor so a `width` x `height` glyph fits, if possible.
    fn make_room(&mut self, width: u32, height: u32, size: u32, gutter: u32) -> bool {
        let fits = |x: u32, y: u32| {
            x.saturating_add(width).saturating_add(gutter) <= size
                && y.saturating_add(height).saturating_add(gutter) <= size
        };
        if fits(self.next_x, self.next_y) {
            return true;
        }
        let row_y = self
            .next_y
            .saturating_add(self.row_height)
            .saturating_add(gutter);
        if fits(gutter, row_y) {
            self.next_x = gutter;
            self.next_y = row_y;
            self.row_height = 0;
            return true;
        }
        false
    }

    fn place(&mut self, codepoint: u32, width: u32, height: u32, pixels: &[u8], gutter: u32) -> (u32, u32) {
        let (x, y) = (self.next_x, self.next_y);
        self.texture.write_region(x, y, width, height, pixels);
        self.next_x = x + width + gutter;
        self.row_height = self.row_height.max(height);
        self.codepoints.push(codepoint);
        (x, y)
    }

    /// Reset the cursor and zero the texture; returns the evicted codepoints.
    fn reset(&mut self, gutter: u32) -> Vec<u32> {
        self.next_x = gutter;
        self.next_y = gutter;
        self.row_height = 0;
        self.texture.clear();
        std::mem::take(&mut self.codepoints)
    }
}

/// Atlas for one font.
#[derive(Debug)]
pub struct Atlas<A: TextureAllocator> {
    config: AtlasConfig,
    allocator: Arc<A>,
    pages: Vec<AtlasPage<A::Texture>>,
    oldest: usize,
    eviction_counter: u32,
}

impl<A: TextureAllocator> Atlas<A> {
    /// Empty atlas; pages are allocated on demand.
    pub fn new(config: AtlasConfig, allocator: Arc<A>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            allocator,
            pages: Vec::with_capacity(config.max_pages),
            oldest: 0,
            eviction_counter: 0,
        })
    }

    /// Atlas configuration.
    pub const fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Allocated pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page by index.
    pub fn page(&self, index: usize) -> Option<&AtlasPage<A::Texture>> {
        self.pages.get(index)
    }

    /// Number of evictions so far. Only ever increases.
    pub const fn eviction_counter(&self) -> u32 {
        self.eviction_counter
    }

    /// Page that will be evicted next.
    pub const fn oldest_page(&self) -> usize {
        self.oldest
    }

    /// Copy a glyph into the atlas, evicting the oldest page if needed.
    pub fn upload(&mut self, codepoint: u32, width: u32, height: u32, pixels: &[u8]) -> Result<Upload> {
        let AtlasConfig {
            size,
            gutter,
            pixel_format,
            ..
        } = self.config;

        let limit = self.config.max_glyph_edge();
        if width > limit || height > limit {
            return Err(AtlasError::GlyphTooLarge {
                codepoint,
                width,
                height,
                page_size: size,
            });
        }
        let expected = width as usize * height as usize * pixel_format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(AtlasError::PixelDataMismatch {
                codepoint,
                expected,
                actual: pixels.len(),
            });
        }

        let mut evicted = Vec::new();
        let index = match self
            .pages
            .iter_mut()
            .position(|page| page.make_room(width, height, size, gutter))
        {
            Some(index) => index,
            None if self.pages.len() < self.config.max_pages => {
                let texture = self.allocator.allocate(size, size, pixel_format)?;
                self.pages.push(AtlasPage::new(texture, gutter));
                debug!("Allocated atlas page {}", self.pages.len() - 1);
                self.pages.len() - 1
            }
            None => {
                let index = self.oldest;
                evicted = self.pages[index].reset(gutter);
                self.eviction_counter = self.eviction_counter.wrapping_add(1);
                self.oldest = (self.oldest + 1) % self.pages.len();
                debug!(
                    "Evicted atlas page {} ({} glyphs, eviction #{})",
                    index,
                    evicted.len(),
                    self.eviction_counter
                );
                index
            }
        };

        let (x, y) = self.pages[index].place(codepoint, width, height, pixels, gutter);
        let scale = size as f32;
        Ok(Upload {
            placement: AtlasPlacement {
                page: index,
                x,
                y,
                u0: x as f32 / scale,
                v0: y as f32 / scale,
                u1: (x + width) as f32 / scale,
                v1: (y + height) as f32 / scale,
            },
            evicted,
        })
    }

    /// Wipe every page; returns all codepoints that were placed.
    ///
    /// Textures stay allocated. Advances the eviction counter by one
    /// instead of resetting it, so stamps taken before the clear go stale.
    pub fn clear(&mut self) -> Vec<u32> {
        let gutter = self.config.gutter;
        let evicted: Vec<u32> = self
            .pages
            .iter_mut()
            .flat_map(|page| page.reset(gutter))
            .collect();
        self.oldest = 0;
        self.eviction_counter = self.eviction_counter.wrapping_add(1);
        info!("Cleared {} atlas pages", self.pages.len());
        evicted
    }
}
