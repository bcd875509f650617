//! Glyph lookup through the registry: atlas eviction, disk hits and corruption
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use pretty_assertions::assert_eq;
use sdfcache_atlas::{
    AtlasConfig, CpuTextureAllocator, FontCacheConfig, FontRegistry, FontSource, GlyphSource,
    GlyphState, RasterizedGlyph, Rasterizer,
};
use sdfcache_formats::PixelFormat;
use sdfcache_storage::{CacheDirectory, StorageConfig};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const EDGE: u16 = 24;

/// 24x24 glyphs filled with the low byte of the codepoint.
#[derive(Default)]
struct Solid {
    calls: Arc<AtomicUsize>,
}

impl Rasterizer for Solid {
    fn rasterize(&mut self, codepoint: u32) -> Option<RasterizedGlyph> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Some(RasterizedGlyph {
            width: EDGE,
            height: EDGE,
            bitmap_top: 20,
            bitmap_left: 2,
            pixels: vec![codepoint as u8; usize::from(EDGE) * usize::from(EDGE) * 4],
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("sdfcache_atlas=debug,sdfcache_storage=debug")
        .try_init();
}

/// 64px pages with a 4px gutter hold four 24px glyphs each.
fn config(root: &Path) -> FontCacheConfig {
    FontCacheConfig::default()
        .with_storage(StorageConfig::new(root).with_render(16, 4, PixelFormat::Rgba8))
        .with_atlas(AtlasConfig::default().with_size(64).with_gutter(4).with_max_pages(2))
}

fn font() -> FontSource {
    FontSource::new("Atlas Test", "Regular", b"not really a font".to_vec())
}

#[test]
fn full_atlas_evicts_oldest_page() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = FontRegistry::new(config(tmp.path()), CpuTextureAllocator::new()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let rasterizer = Solid {
        calls: Arc::clone(&calls),
    };
    let id = registry.register(&font(), Box::new(rasterizer)).unwrap().unwrap();

    for cp in 0x41..0x49u32 {
        let metrics = registry.get_glyph(id, cp).unwrap();
        assert_eq!(metrics.atlas_page_index(), Some(((cp - 0x41) / 4) as usize));
        assert_eq!(metrics.source, GlyphSource::ColdGenerate);
    }

    let cache = registry.get_mut(id).unwrap();
    assert_eq!(cache.atlas_page_count(), 2);
    assert_eq!(cache.eviction_counter(), 0);
    let stamp = cache.eviction_stamp();

    let placement = cache.get_glyph(0x49).unwrap().placement.unwrap();
    assert_eq!(placement.page, 0);
    assert_eq!((placement.x, placement.y), (4, 4));
    assert_eq!(cache.eviction_counter(), 1);
    assert!(!stamp.is_current(cache.eviction_counter()));

    for cp in 0x41..0x45 {
        assert_eq!(cache.glyph_state(cp), GlyphState::Unrequested);
    }
    for cp in 0x45..0x49 {
        assert_eq!(
            cache.glyph_state(cp),
            GlyphState::UploadedToAtlas(GlyphSource::ColdGenerate)
        );
    }
    let page = cache.atlas_page(0).unwrap();
    assert_eq!(page.codepoints(), &[0x49]);
    assert_eq!(page.texture().texel(4, 4), Some(&[0x49; 4][..]));
    assert_eq!(page.texture().texel(40, 4), Some(&[0; 4][..]));

    // Evicted glyphs come back from disk without rasterizing
    cache.flush();
    let metrics = cache.get_glyph(0x41).unwrap().clone();
    assert_eq!(metrics.source, GlyphSource::DiskHit);
    let placement = metrics.placement.unwrap();
    assert_eq!(placement.page, 0);
    assert_eq!(
        cache.atlas_page(0).unwrap().texture().texel(placement.x, placement.y),
        Some(&[0x41; 4][..])
    );
    assert_eq!(calls.load(Ordering::Relaxed), 9);
    assert_eq!(cache.eviction_counter(), 1);
}

#[test]
fn fresh_registry_serves_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    {
        let mut registry = FontRegistry::new(config.clone(), CpuTextureAllocator::new()).unwrap();
        let id = registry.register(&font(), Box::new(Solid::default())).unwrap().unwrap();
        for cp in 0x30..0x3A {
            registry.get_glyph(id, cp).unwrap();
        }
    }

    let mut registry = FontRegistry::new(config, CpuTextureAllocator::new()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let rasterizer = Solid {
        calls: Arc::clone(&calls),
    };
    let id = registry.register(&font(), Box::new(rasterizer)).unwrap().unwrap();
    assert_eq!(registry.get(id).unwrap().manifest_size(), 10);

    let metrics = registry.get_glyph(id, 0x35).unwrap();
    assert_eq!(metrics.source, GlyphSource::DiskHit);
    assert_eq!((metrics.width, metrics.height), (EDGE, EDGE));
    assert_eq!((metrics.bitmap_top, metrics.bitmap_left), (20, 2));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn corrupt_block_is_regenerated() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let directory = CacheDirectory::for_font(
        &config.storage.root,
        "Atlas Test",
        "Regular",
        &config.storage.key(),
    );

    {
        let mut registry = FontRegistry::new(config.clone(), CpuTextureAllocator::new()).unwrap();
        let id = registry.register(&font(), Box::new(Solid::default())).unwrap().unwrap();
        registry.get_glyph(id, 0x41).unwrap();
    }

    let block = directory.block_path(0);
    let mut bytes = std::fs::read(&block).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&block, &bytes).unwrap();

    {
        let mut registry = FontRegistry::new(config.clone(), CpuTextureAllocator::new()).unwrap();
        let id = registry.register(&font(), Box::new(Solid::default())).unwrap().unwrap();
        let metrics = registry.get_glyph(id, 0x41).unwrap();
        assert_eq!(metrics.source, GlyphSource::ColdGenerate);
    }

    // The regenerated glyph replaced the corrupt file
    let mut registry = FontRegistry::new(config, CpuTextureAllocator::new()).unwrap();
    let id = registry.register(&font(), Box::new(Solid::default())).unwrap().unwrap();
    assert_eq!(registry.get_glyph(id, 0x41).unwrap().source, GlyphSource::DiskHit);
}

#[test]
fn clear_all_atlases_keeps_disk_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = FontRegistry::new(config(tmp.path()), CpuTextureAllocator::new()).unwrap();
    let id = registry.register(&font(), Box::new(Solid::default())).unwrap().unwrap();
    registry.get_glyph(id, 0x41).unwrap();

    registry.clear_all_atlases();
    let cache = registry.get(id).unwrap();
    assert_eq!(cache.cached_glyphs(), 0);
    assert_eq!(cache.eviction_counter(), 1);
    assert!(cache.atlas_page(0).unwrap().texture().is_blank());

    assert_eq!(registry.get_glyph(id, 0x41).unwrap().source, GlyphSource::DiskHit);
}
