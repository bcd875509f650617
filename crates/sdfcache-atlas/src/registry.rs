//! Process-wide registry of font glyph caches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sdfcache_storage::{BlockStore, DiskCache, SharedBlockStore};
use tracing::{debug, info, warn};

use crate::config::{FontCacheConfig, PregenConfig};
use crate::glyph_cache::{FontGlyphCache, GlyphMetrics};
use crate::pregen::Pregenerator;
use crate::traits::{FontSource, FontValidator, Rasterizer, TextureAllocator};
use crate::Result;

/// MD5 of a font's bytes, plus the face index inside a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontFingerprint {
    digest: [u8; 16],
    face_index: u32,
}

impl FontFingerprint {
    /// Fingerprint a font.
    pub fn of(font: &FontSource) -> Self {
        Self {
            digest: md5::compute(&*font.data).0,
            face_index: font.face_index,
        }
    }

    /// MD5 of the font bytes.
    pub const fn digest(&self) -> &[u8; 16] {
        &self.digest
    }
}

impl fmt::Display for FontFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode(self.digest), self.face_index)
    }
}

/// Stable per-process font handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontId(u32);

impl FontId {
    /// Numeric id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Owns every font cache in the process and the block store they share.
pub struct FontRegistry<A: TextureAllocator> {
    config: FontCacheConfig,
    store: SharedBlockStore,
    allocator: Arc<A>,
    validator: Option<Box<dyn FontValidator + Send + Sync>>,
    ids: HashMap<FontFingerprint, FontId>,
    next_id: u32,
    fonts: HashMap<FontId, FontGlyphCache<A>>,
}

impl<A: TextureAllocator> fmt::Debug for FontRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontRegistry")
            .field("root", &self.config.storage.root)
            .field("known_fonts", &self.ids.len())
            .field("served_fonts", &self.fonts.len())
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<A: TextureAllocator> FontRegistry<A> {
    /// Create a registry with its own block store.
    pub fn new(config: FontCacheConfig, allocator: A) -> Result<Self> {
        config.validate()?;
        let store = BlockStore::shared(&config.storage)?;
        info!(
            "Font registry at {} ({} arena slots)",
            config.storage.root.display(),
            config.storage.arena_slots
        );
        Ok(Self {
            config,
            store,
            allocator: Arc::new(allocator),
            validator: None,
            ids: HashMap::new(),
            next_id: 1,
            fonts: HashMap::new(),
        })
    }

    /// Install the validator consulted for fonts without a usable cache.
    #[must_use]
    pub fn with_validator<V: FontValidator + Send + Sync + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Registry configuration.
    pub const fn config(&self) -> &FontCacheConfig {
        &self.config
    }

    /// Block store shared by every font.
    pub const fn block_store(&self) -> &SharedBlockStore {
        &self.store
    }

    /// Texture allocator shared by every font.
    pub const fn allocator(&self) -> &Arc<A> {
        &self.allocator
    }

    /// Id for `font`; identical bytes always map to the same id.
    pub fn font_id(&mut self, font: &FontSource) -> FontId {
        let fingerprint = FontFingerprint::of(font);
        if let Some(&id) = self.ids.get(&fingerprint) {
            return id;
        }
        let id = FontId(self.next_id);
        self.next_id += 1;
        self.ids.insert(fingerprint, id);
        debug!("Font {} {} is {} ({})", font.family, font.style, id.0, fingerprint);
        id
    }

    /// Open the cache for `font` and start serving it if it passes the gate.
    ///
    /// Returns `Ok(None)` for fonts that are not served. Registering a
    /// font that is already served returns its id and drops `rasterizer`.
    pub fn register(
        &mut self,
        font: &FontSource,
        rasterizer: Box<dyn Rasterizer + Send>,
    ) -> Result<Option<FontId>> {
        let id = self.font_id(font);
        if self.fonts.contains_key(&id) {
            return Ok(Some(id));
        }

        let disk = DiskCache::open(&self.store, &self.config.storage, &font.family, &font.style)?;
        if !self.is_servable(font, disk.manifest_size()) {
            warn!(
                "Not serving {} {}: {} cached glyphs and no validator approval",
                font.family,
                font.style,
                disk.manifest_size()
            );
            return Ok(None);
        }

        let cache = FontGlyphCache::new(
            disk,
            self.config.storage.key(),
            rasterizer,
            self.config.atlas,
            Arc::clone(&self.allocator),
        )?;
        self.fonts.insert(id, cache);
        info!("Serving {} {} as font {}", font.family, font.style, id.0);
        Ok(Some(id))
    }

    /// Whether a font with `cached` manifest entries may be served.
    ///
    /// The validator is only asked when the cache alone is not enough, and
    /// a registry without one accepts every font.
    pub fn is_servable(&self, font: &FontSource, cached: usize) -> bool {
        let approved = || {
            self.config.allow_unsafe_fonts
                || self
                    .validator
                    .as_ref()
                    .is_none_or(|validator| validator.is_compatible(font))
        };
        if self.config.cjk_mode {
            cached >= self.config.cjk_threshold && approved()
        } else {
            cached > 0 || approved()
        }
    }

    /// Served font by id.
    pub fn get(&self, id: FontId) -> Option<&FontGlyphCache<A>> {
        self.fonts.get(&id)
    }

    /// Served font by id, mutably.
    pub fn get_mut(&mut self, id: FontId) -> Option<&mut FontGlyphCache<A>> {
        self.fonts.get_mut(&id)
    }

    /// Shorthand for `get_mut(id)?.get_glyph(codepoint)`.
    pub fn get_glyph(&mut self, id: FontId, codepoint: u32) -> Option<&GlyphMetrics> {
        self.fonts.get_mut(&id)?.get_glyph(codepoint)
    }

    /// Stop serving a font; its cache flushes and closes.
    pub fn unregister(&mut self, id: FontId) -> bool {
        self.fonts.remove(&id).is_some()
    }

    /// Number of fonts being served.
    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Whether no font is being served.
    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Pregenerator writing into this registry's caches.
    pub fn pregenerator(&self, options: PregenConfig) -> Pregenerator<'_> {
        Pregenerator::new(&self.store, &self.config.storage).with_options(options)
    }

    /// Wipe every font's atlas. Each font's eviction counter advances by one.
    pub fn clear_all_atlases(&mut self) {
        for cache in self.fonts.values_mut() {
            cache.clear_atlas();
        }
    }

    /// Close every font cache and unmap every block.
    pub fn shutdown(&mut self) {
        let count = self.fonts.len();
        self.fonts.clear();
        self.ids.clear();
        self.store.lock().release_all();
        info!("Font registry shut down ({} fonts closed)", count);
    }
}

impl<A: TextureAllocator> Drop for FontRegistry<A> {
    fn drop(&mut self) {
        if !self.fonts.is_empty() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::texture::CpuTextureAllocator;
    use crate::traits::RasterizedGlyph;
    use pretty_assertions::assert_eq;
    use sdfcache_formats::PixelFormat;
    use sdfcache_storage::{GlyphRecord, StorageConfig};

    struct Blank;

    impl Rasterizer for Blank {
        fn rasterize(&mut self, _codepoint: u32) -> Option<RasterizedGlyph> {
            Some(RasterizedGlyph {
                width: 2,
                height: 2,
                pixels: vec![9; 16],
                ..RasterizedGlyph::default()
            })
        }
    }

    fn config(root: &std::path::Path) -> FontCacheConfig {
        FontCacheConfig::default().with_storage(
            StorageConfig::new(root)
                .with_render(8, 2, PixelFormat::Rgba8)
                .with_arena_slots(4),
        )
    }

    fn font(family: &str, bytes: &[u8]) -> FontSource {
        FontSource::new(family, "Regular", bytes.to_vec())
    }

    #[test]
    fn test_fingerprint_ids() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut registry = FontRegistry::new(config(tmp.path()), CpuTextureAllocator::new()).expect("registry");

        let a = registry.font_id(&font("A", b"font-a"));
        let same = registry.font_id(&font("Renamed", b"font-a"));
        let b = registry.font_id(&font("B", b"font-b"));
        let face = registry.font_id(&font("A", b"font-a").with_face_index(1));
        assert_eq!(a, same);
        assert_ne!(a, b);
        assert_ne!(a, face);
        assert_eq!(
            FontFingerprint::of(&font("A", b"")).to_string(),
            "d41d8cd98f00b204e9800998ecf8427e#0"
        );
    }

    #[test]
    fn test_validator_gates_empty_caches() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut registry = FontRegistry::new(config(tmp.path()), CpuTextureAllocator::new())
            .expect("registry")
            .with_validator(|font: &FontSource| font.family != "Broken");

        assert!(registry.register(&font("Broken", b"x"), Box::new(Blank)).expect("register").is_none());
        let ok = registry
            .register(&font("Fine", b"y"), Box::new(Blank))
            .expect("register")
            .expect("served");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.register(&font("Fine", b"y"), Box::new(Blank)).expect("again"), Some(ok));
        assert_eq!(registry.get_glyph(ok, 0x41).expect("glyph").width, 2);
    }

    #[test]
    fn test_existing_cache_bypasses_validator() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config(tmp.path());
        {
            let store = BlockStore::shared(&config.storage).expect("store");
            let mut disk = DiskCache::open(&store, &config.storage, "Broken", "Regular").expect("disk");
            disk.store_glyph(GlyphRecord::new(0x41, 2, 2, 0, 0, vec![1; 16]));
        }
        let mut registry = FontRegistry::new(config, CpuTextureAllocator::new())
            .expect("registry")
            .with_validator(|_: &FontSource| false);
        assert!(registry.register(&font("Broken", b"x"), Box::new(Blank)).expect("register").is_some());
    }

    #[test]
    fn test_cjk_threshold() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config(tmp.path()).with_cjk_mode(true).with_cjk_threshold(2);
        let registry = FontRegistry::new(config, CpuTextureAllocator::new()).expect("registry");
        let source = font("Cjk", b"z");
        assert!(!registry.is_servable(&source, 1));
        assert!(registry.is_servable(&source, 2));
    }

    #[test]
    fn test_shutdown_releases_textures() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut registry = FontRegistry::new(config(tmp.path()), CpuTextureAllocator::new()).expect("registry");
        let id = registry
            .register(&font("Fine", b"y"), Box::new(Blank))
            .expect("register")
            .expect("served");
        registry.get_glyph(id, 0x41).expect("glyph");
        assert_eq!(registry.allocator().live_textures(), 1);

        registry.shutdown();
        assert!(registry.is_empty());
        assert_eq!(registry.allocator().live_textures(), 0);
        assert_eq!(registry.block_store().lock().mapped_blocks(), 0);
    }
}
