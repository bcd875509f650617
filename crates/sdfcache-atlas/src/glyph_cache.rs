//! Per-font glyph cache: memory, then disk, then the rasterizer.

use std::collections::HashMap;
use std::sync::Arc;

use sdfcache_formats::CacheKey;
use sdfcache_storage::{DiskCache, FlushReport, GlyphRecord};
use tracing::{debug, warn};

use crate::atlas::{Atlas, AtlasPage, AtlasPlacement};
use crate::config::AtlasConfig;
use crate::stamp::EvictionStamp;
use crate::traits::{RasterizedGlyph, Rasterizer, TextureAllocator};
use crate::Result;

/// Where a glyph's bitmap came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlyphSource {
    /// Read from the disk cache
    DiskHit,
    /// Produced by the rasterizer and staged for writing
    ColdGenerate,
}

/// Lifecycle of a codepoint in one font cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphState {
    /// Never requested, or purged by an eviction
    Unrequested,
    /// Metrics known, no atlas placement (empty bitmap or upload failure)
    InMemory(GlyphSource),
    /// Metrics known and the bitmap sits in an atlas page
    UploadedToAtlas(GlyphSource),
}

/// Everything a text renderer needs to draw one glyph.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphMetrics {
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
    /// Origin of the bitmap
    pub source: GlyphSource,
    /// Atlas location, absent for glyphs with nothing to draw
    pub placement: Option<AtlasPlacement>,
}

impl GlyphMetrics {
    /// Atlas page index, if placed.
    pub fn atlas_page_index(&self) -> Option<usize> {
        self.placement.map(|p| p.page)
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlyphCacheStats {
    /// Served from memory
    pub memory_hits: u64,
    /// Loaded from disk
    pub disk_hits: u64,
    /// Rasterized
    pub generated: u64,
    /// Rasterizer produced nothing usable
    pub failures: u64,
}

/// Glyph metrics, atlas and disk cache for one font.
pub struct FontGlyphCache<A: TextureAllocator> {
    disk: DiskCache,
    rasterizer: Box<dyn Rasterizer + Send>,
    atlas: Atlas<A>,
    glyphs: HashMap<u32, GlyphMetrics>,
    key: CacheKey,
    stats: GlyphCacheStats,
}

impl<A: TextureAllocator> std::fmt::Debug for FontGlyphCache<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontGlyphCache")
            .field("directory", self.disk.directory())
            .field("glyphs", &self.glyphs.len())
            .field("pages", &self.atlas.page_count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<A: TextureAllocator> FontGlyphCache<A> {
    /// Combine an open disk cache, a rasterizer and a texture allocator.
    pub fn new(
        disk: DiskCache,
        key: CacheKey,
        rasterizer: Box<dyn Rasterizer + Send>,
        atlas: AtlasConfig,
        allocator: Arc<A>,
    ) -> Result<Self> {
        Ok(Self {
            disk,
            rasterizer,
            atlas: Atlas::new(atlas, allocator)?,
            glyphs: HashMap::new(),
            key,
            stats: GlyphCacheStats::default(),
        })
    }

    /// Metrics for `codepoint`, loading or rasterizing it on first use.
    ///
    /// Returns `None` only when the rasterizer has nothing for the
    /// codepoint. Disk problems fall through to rasterization.
    pub fn get_glyph(&mut self, codepoint: u32) -> Option<&GlyphMetrics> {
        if self.glyphs.contains_key(&codepoint) {
            self.stats.memory_hits += 1;
            return self.glyphs.get(&codepoint);
        }

        let (record, source) = match self.load_from_disk(codepoint) {
            Some(record) => {
                self.stats.disk_hits += 1;
                (record, GlyphSource::DiskHit)
            }
            None => {
                let record = self.generate(codepoint)?;
                self.stats.generated += 1;
                (record, GlyphSource::ColdGenerate)
            }
        };

        let placement = self.upload(&record);
        let metrics = GlyphMetrics {
            codepoint,
            width: record.width,
            height: record.height,
            bitmap_top: record.bitmap_top,
            bitmap_left: record.bitmap_left,
            source,
            placement,
        };
        self.glyphs.insert(codepoint, metrics);
        self.glyphs.get(&codepoint)
    }

    /// Current state of `codepoint`.
    pub fn glyph_state(&self, codepoint: u32) -> GlyphState {
        match self.glyphs.get(&codepoint) {
            None => GlyphState::Unrequested,
            Some(m) if m.placement.is_some() => GlyphState::UploadedToAtlas(m.source),
            Some(m) => GlyphState::InMemory(m.source),
        }
    }

    /// Atlas page by index.
    pub fn atlas_page(&self, index: usize) -> Option<&AtlasPage<A::Texture>> {
        self.atlas.page(index)
    }

    /// Allocated atlas pages.
    pub fn atlas_page_count(&self) -> usize {
        self.atlas.page_count()
    }

    /// Page evictions so far.
    pub const fn eviction_counter(&self) -> u32 {
        self.atlas.eviction_counter()
    }

    /// Stamp for the current eviction counter.
    pub const fn eviction_stamp(&self) -> EvictionStamp {
        EvictionStamp::from_counter(self.atlas.eviction_counter())
    }

    /// Glyphs held in memory.
    pub fn cached_glyphs(&self) -> usize {
        self.glyphs.len()
    }

    /// Lookup counters.
    pub const fn stats(&self) -> GlyphCacheStats {
        self.stats
    }

    /// Entries in the font's manifest.
    pub fn manifest_size(&self) -> usize {
        self.disk.manifest_size()
    }

    /// Underlying disk cache.
    pub const fn disk(&self) -> &DiskCache {
        &self.disk
    }

    /// Wipe the atlas and forget every glyph held in memory.
    ///
    /// The eviction counter advances rather than resetting.
    pub fn clear_atlas(&mut self) {
        self.atlas.clear();
        self.glyphs.clear();
    }

    /// Write staged glyphs to disk now.
    pub fn flush(&mut self) -> FlushReport {
        self.disk.flush_pending_writes()
    }

    fn load_from_disk(&self, codepoint: u32) -> Option<GlyphRecord> {
        let record = self.disk.try_load_glyph(codepoint)?;
        if self.is_consistent(record.width, record.height, record.pixels.len()) {
            Some(record)
        } else {
            warn!(
                "Ignoring cached U+{:04X}: {}x{} with {} pixel bytes",
                codepoint,
                record.width,
                record.height,
                record.pixels.len()
            );
            None
        }
    }

    fn generate(&mut self, codepoint: u32) -> Option<GlyphRecord> {
        let Some(RasterizedGlyph {
            width,
            height,
            bitmap_top,
            bitmap_left,
            pixels,
        }) = self.rasterizer.rasterize(codepoint)
        else {
            self.stats.failures += 1;
            debug!("No glyph for U+{:04X}", codepoint);
            return None;
        };
        if !self.is_consistent(width, height, pixels.len()) {
            self.stats.failures += 1;
            warn!(
                "Rasterizer returned unusable U+{:04X}: {}x{} with {} pixel bytes",
                codepoint,
                width,
                height,
                pixels.len()
            );
            return None;
        }

        let record = GlyphRecord::new(codepoint, width, height, bitmap_top, bitmap_left, pixels);
        if let Some(report) = self.disk.store_glyph(record.clone()) {
            debug!(
                "Flushed {} glyphs into {} blocks",
                report.glyphs_written, report.blocks_written
            );
        }
        Some(record)
    }

    fn upload(&mut self, record: &GlyphRecord) -> Option<AtlasPlacement> {
        if record.width == 0 || record.height == 0 || record.pixels.is_empty() {
            return None;
        }
        match self.atlas.upload(
            record.codepoint,
            u32::from(record.width),
            u32::from(record.height),
            &record.pixels,
        ) {
            Ok(upload) => {
                for codepoint in &upload.evicted {
                    self.glyphs.remove(codepoint);
                }
                Some(upload.placement)
            }
            Err(e) => {
                warn!("Atlas upload of U+{:04X} failed: {e}", record.codepoint);
                None
            }
        }
    }

    fn is_consistent(&self, width: u16, height: u16, len: usize) -> bool {
        fits_key(&self.key, width, height, len)
    }
}

/// Dimensions within the key's bounds and a pixel buffer that matches them.
pub(crate) fn fits_key(key: &CacheKey, width: u16, height: u16, len: usize) -> bool {
    let max = key.max_glyph_dimension();
    let bytes_per_pixel = key.format().map_or(4, |f| f.bytes_per_pixel());
    u32::from(width) <= max
        && u32::from(height) <= max
        && len == usize::from(width) * usize::from(height) * bytes_per_pixel
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::texture::CpuTextureAllocator;
    use pretty_assertions::assert_eq;
    use sdfcache_formats::PixelFormat;
    use sdfcache_storage::{BlockStore, StorageConfig};

    /// Square glyphs whose edge depends on the codepoint; `'!'` has no glyph.
    struct SquareRasterizer {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Rasterizer for SquareRasterizer {
        fn rasterize(&mut self, codepoint: u32) -> Option<RasterizedGlyph> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            match codepoint {
                0x21 => None,
                0x20 => Some(RasterizedGlyph::empty(0, 0)),
                _ => {
                    let edge = 4 + (codepoint % 4) as u16;
                    Some(RasterizedGlyph {
                        width: edge,
                        height: edge,
                        bitmap_top: 7,
                        bitmap_left: 1,
                        pixels: vec![codepoint as u8; usize::from(edge) * usize::from(edge) * 4],
                    })
                }
            }
        }
    }

    fn open(
        root: &std::path::Path,
        atlas: AtlasConfig,
    ) -> (FontGlyphCache<CpuTextureAllocator>, Arc<std::sync::atomic::AtomicUsize>) {
        let config = StorageConfig::new(root)
            .with_render(4, 2, PixelFormat::Rgba8)
            .with_batch_size(8);
        let store = BlockStore::shared(&config).expect("store");
        let disk = DiskCache::open(&store, &config, "Test", "Regular").expect("disk");
        let calls = Arc::default();
        let rasterizer = SquareRasterizer {
            calls: Arc::clone(&calls),
        };
        let cache = FontGlyphCache::new(
            disk,
            config.key(),
            Box::new(rasterizer),
            atlas,
            Arc::new(CpuTextureAllocator::new()),
        )
        .expect("cache");
        (cache, calls)
    }

    #[test]
    fn test_memoized_lookup() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut cache, calls) = open(tmp.path(), AtlasConfig::default().with_size(64).with_gutter(2));

        let first = cache.get_glyph(0x41).expect("glyph").clone();
        assert_eq!(first.source, GlyphSource::ColdGenerate);
        assert_eq!((first.width, first.height), (5, 5));
        assert_eq!(first.atlas_page_index(), Some(0));
        assert_eq!(cache.get_glyph(0x41), Some(&first));
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(cache.glyph_state(0x41), GlyphState::UploadedToAtlas(GlyphSource::ColdGenerate));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_empty_and_missing_glyphs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut cache, _) = open(tmp.path(), AtlasConfig::default().with_size(64).with_gutter(2));

        let space = cache.get_glyph(0x20).expect("space").clone();
        assert_eq!(space.placement, None);
        assert_eq!(cache.glyph_state(0x20), GlyphState::InMemory(GlyphSource::ColdGenerate));
        assert_eq!(cache.atlas_page_count(), 0);

        assert!(cache.get_glyph(0x21).is_none());
        assert_eq!(cache.glyph_state(0x21), GlyphState::Unrequested);
        assert_eq!(cache.stats().failures, 1);
        assert_eq!(cache.disk().pending_writes(), 1);
    }

    #[test]
    fn test_eviction_purges_metrics_and_reloads_from_staging() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // 16px page, 2px gutter: one glyph per page
        let atlas = AtlasConfig::default().with_size(16).with_gutter(2).with_max_pages(2);
        let (mut cache, calls) = open(tmp.path(), atlas);

        cache.get_glyph(0x41).expect("A");
        cache.get_glyph(0x42).expect("B");
        assert_eq!(cache.eviction_counter(), 0);
        let stamp = cache.eviction_stamp();

        cache.get_glyph(0x43).expect("C");
        assert_eq!(cache.eviction_counter(), 1);
        assert!(!stamp.is_current(cache.eviction_counter()));
        assert_eq!(cache.glyph_state(0x41), GlyphState::Unrequested);
        assert_eq!(cache.glyph_state(0x42), GlyphState::UploadedToAtlas(GlyphSource::ColdGenerate));

        let again = cache.get_glyph(0x41).expect("A again").clone();
        assert_eq!(again.source, GlyphSource::DiskHit);
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(cache.eviction_counter(), 2);
    }

    #[test]
    fn test_clear_atlas_forgets_glyphs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut cache, _) = open(tmp.path(), AtlasConfig::default().with_size(64).with_gutter(2));
        cache.get_glyph(0x41).expect("A");
        cache.clear_atlas();
        assert_eq!(cache.cached_glyphs(), 0);
        assert!(cache.atlas_page(0).expect("page").texture().is_blank());
        assert_eq!(cache.get_glyph(0x41).expect("A").source, GlyphSource::DiskHit);
    }
}
