//! Configuration for atlases, font caches and pregeneration

use std::path::Path;

use sdfcache_formats::PixelFormat;
use sdfcache_storage::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::{AtlasError, Result};

/// Manifest size at which a CJK font cache counts as fully generated.
pub const CJK_CACHE_THRESHOLD: usize = 16_661;

/// Atlas page layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Edge length of each square page in pixels
    pub size: u32,

    /// Empty pixels kept around every glyph
    pub gutter: u32,

    /// Pages allocated before the oldest one is evicted
    pub max_pages: usize,

    /// Texture pixel format; must match the stored bitmaps
    pub pixel_format: PixelFormat,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            gutter: 12,
            max_pages: 4,
            pixel_format: PixelFormat::Rgba8,
        }
    }
}

impl AtlasConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(AtlasError::Config("max_pages must be non-zero".into()));
        }
        if self.size <= self.gutter.saturating_mul(2) {
            return Err(AtlasError::Config(format!(
                "atlas size {} leaves no room inside a {}px gutter",
                self.size, self.gutter
            )));
        }
        Ok(())
    }

    /// Largest glyph edge that fits on an empty page.
    pub const fn max_glyph_edge(&self) -> u32 {
        self.size.saturating_sub(self.gutter.saturating_mul(2))
    }

    /// Set the page size
    #[must_use]
    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Set the gutter
    #[must_use]
    pub const fn with_gutter(mut self, gutter: u32) -> Self {
        self.gutter = gutter;
        self
    }

    /// Set the page limit
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }
}

/// Configuration shared by every font in a [`FontRegistry`](crate::FontRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontCacheConfig {
    /// Disk cache settings
    pub storage: StorageConfig,

    /// Atlas settings
    pub atlas: AtlasConfig,

    /// Serve only fonts whose cache holds at least `cjk_threshold` entries
    pub cjk_mode: bool,

    /// Entries a CJK font cache needs before it is served
    pub cjk_threshold: usize,

    /// Serve fonts even when the validator rejects them
    pub allow_unsafe_fonts: bool,
}

impl Default for FontCacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            atlas: AtlasConfig::default(),
            cjk_mode: false,
            cjk_threshold: CJK_CACHE_THRESHOLD,
            allow_unsafe_fonts: false,
        }
    }
}

impl FontCacheConfig {
    /// Create a configuration whose caches live under `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            storage: StorageConfig::new(root),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check both halves and that they agree on the pixel format
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.atlas.validate()?;
        if self.storage.pixel_format != self.atlas.pixel_format {
            return Err(AtlasError::Config(format!(
                "atlas format {:?} differs from stored format {:?}",
                self.atlas.pixel_format, self.storage.pixel_format
            )));
        }
        if self.storage.key().max_glyph_dimension() > self.atlas.max_glyph_edge() {
            return Err(AtlasError::Config(format!(
                "glyphs up to {}px do not fit {}px atlas pages",
                self.storage.key().max_glyph_dimension(),
                self.atlas.size
            )));
        }
        Ok(())
    }

    /// Replace the storage settings
    #[must_use]
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Replace the atlas settings
    #[must_use]
    pub const fn with_atlas(mut self, atlas: AtlasConfig) -> Self {
        self.atlas = atlas;
        self
    }

    /// Enable or disable CJK gating
    #[must_use]
    pub const fn with_cjk_mode(mut self, cjk_mode: bool) -> Self {
        self.cjk_mode = cjk_mode;
        self
    }

    /// Set the CJK entry threshold
    #[must_use]
    pub const fn with_cjk_threshold(mut self, threshold: usize) -> Self {
        self.cjk_threshold = threshold;
        self
    }

    /// Allow fonts the validator rejects
    #[must_use]
    pub const fn with_allow_unsafe_fonts(mut self, allow: bool) -> Self {
        self.allow_unsafe_fonts = allow;
        self
    }
}

/// Pregeneration tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PregenConfig {
    /// Worker threads; 0 uses the available parallelism
    pub workers: usize,

    /// CPU ceiling per worker in percent (1..=100)
    pub cpu_limit_percent: f64,
}

impl Default for PregenConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            cpu_limit_percent: 100.0,
        }
    }
}

impl PregenConfig {
    /// Worker count after resolving 0 to the machine's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }

    /// Set the worker count
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the CPU ceiling
    #[must_use]
    pub const fn with_cpu_limit(mut self, percent: f64) -> Self {
        self.cpu_limit_percent = percent;
        self
    }
}
