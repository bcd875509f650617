//! Glyph atlases and per-font glyph caches on top of `sdfcache-storage`.
//!
//! A [`FontRegistry`] owns one [`FontGlyphCache`] per served font. Lookups
//! go through three tiers:
//!
//! 1. glyph metrics already held in memory,
//! 2. the font's [`DiskCache`](sdfcache_storage::DiskCache),
//! 3. the host's [`Rasterizer`], whose output is staged for writing.
//!
//! Bitmaps are shelf-packed into a small, fixed number of atlas pages.
//! When every page is full the oldest one is wiped and reused; consumers
//! that keep atlas coordinates compare an [`EvictionStamp`] before use.
//!
//! [`Pregenerator`] fills a font's disk cache ahead of time on a pool of
//! worker threads.
#![warn(missing_docs)]
#![allow(clippy::cast_precision_loss)] // UVs are small integers over the page size
#![allow(clippy::module_name_repetitions)]

pub mod atlas;
pub mod config;
pub mod error;
pub mod glyph_cache;
pub mod pregen;
pub mod registry;
pub mod stamp;
pub mod texture;
pub mod throttle;
pub mod traits;

pub use atlas::{Atlas, AtlasPage, AtlasPlacement, Upload};
pub use config::{AtlasConfig, FontCacheConfig, PregenConfig, CJK_CACHE_THRESHOLD};
pub use error::{AtlasError, Result};
pub use glyph_cache::{FontGlyphCache, GlyphCacheStats, GlyphMetrics, GlyphSource, GlyphState};
pub use pregen::{PregenProgress, PregenRange, PregenReport, Pregenerator};
pub use registry::{FontFingerprint, FontId, FontRegistry};
pub use stamp::EvictionStamp;
pub use texture::{CpuTexture, CpuTextureAllocator};
pub use throttle::Throttle;
pub use traits::{AtlasTexture, FontSource, FontValidator, RasterizedGlyph, Rasterizer, TextureAllocator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
