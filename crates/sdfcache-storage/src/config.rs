//! Configuration for the glyph storage system

use crate::{Result, StorageError};
use sdfcache_formats::{CacheKey, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on arena slots (the free-slot bitmap is a `u64`).
pub const MAX_ARENA_SLOTS: usize = 64;

/// How arena slots are backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaBackend {
    /// Reserved address space where available, pooled mappings otherwise
    #[default]
    Auto,
    /// Always reserve address space up front (unix only)
    Reserved,
    /// Independent mappings, bounded by the slot count
    Pooled,
}

/// What happens to staged glyphs whose block lock timed out during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostWritePolicy {
    /// Discard them; they will be regenerated when next requested
    Drop,
    /// Keep them staged and retry on every later flush
    #[default]
    Retain,
    /// Keep them staged for at most this many further flushes
    RetainAttempts(u32),
}

/// Configuration for the glyph storage system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per font cache
    pub root: PathBuf,

    /// Glyph render size in pixels
    pub render_size: u32,

    /// Distance-field spread in pixels
    pub spread: u32,

    /// Pixel format of stored bitmaps
    pub pixel_format: PixelFormat,

    /// Number of block files that may be mapped at once (1..=64)
    pub arena_slots: usize,

    /// Arena backing strategy
    pub arena_backend: ArenaBackend,

    /// Staged glyphs that trigger a flush
    pub batch_size: usize,

    /// Timeout for a block file's exclusive lock, in milliseconds
    pub block_lock_timeout_ms: u64,

    /// Timeout for the shared manifest lock taken on load, in milliseconds
    pub manifest_shared_timeout_ms: u64,

    /// Timeout for the exclusive manifest lock taken on commit, in milliseconds
    pub manifest_exclusive_timeout_ms: u64,

    /// Sleep between lock attempts, in milliseconds
    pub lock_poll_interval_ms: u64,

    /// Snapshots or journals larger than this are treated as corrupt
    pub max_manifest_bytes: u64,

    /// Emit the direct index table in block files
    pub write_index: bool,

    /// Handling of glyphs whose block could not be locked
    pub lost_write_policy: LostWritePolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./sdfcache"),
            render_size: 64,
            spread: 8,
            pixel_format: PixelFormat::Rgba8,
            arena_slots: 16,
            arena_backend: ArenaBackend::Auto,
            batch_size: 128,
            block_lock_timeout_ms: 1_000,
            manifest_shared_timeout_ms: 10_000,
            manifest_exclusive_timeout_ms: 1_000,
            lock_poll_interval_ms: 10,
            max_manifest_bytes: 32 * 1024 * 1024, // 32 MiB
            write_index: true,
            lost_write_policy: LostWritePolicy::Retain,
        }
    }
}

impl StorageConfig {
    /// Create a new configuration rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
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

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.arena_slots == 0 || self.arena_slots > MAX_ARENA_SLOTS {
            return Err(StorageError::Config(format!(
                "arena_slots must be within 1..={MAX_ARENA_SLOTS}, got {}",
                self.arena_slots
            )));
        }
        if self.render_size == 0 {
            return Err(StorageError::Config("render_size must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(StorageError::Config("batch_size must be non-zero".into()));
        }
        if self.max_manifest_bytes < sdfcache_formats::manifest::MANIFEST_HEADER_SIZE as u64 {
            return Err(StorageError::Config(format!(
                "max_manifest_bytes too small: {}",
                self.max_manifest_bytes
            )));
        }
        Ok(())
    }

    /// Cache key derived from the render parameters
    pub const fn key(&self) -> CacheKey {
        CacheKey::new(self.render_size, self.spread, self.pixel_format)
    }

    /// Block lock timeout
    pub const fn block_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.block_lock_timeout_ms)
    }

    /// Shared manifest lock timeout
    pub const fn manifest_shared_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_shared_timeout_ms)
    }

    /// Exclusive manifest lock timeout
    pub const fn manifest_exclusive_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_exclusive_timeout_ms)
    }

    /// Lock polling interval
    pub const fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    /// Set the cache root
    #[must_use]
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Set the render parameters
    #[must_use]
    pub const fn with_render(mut self, render_size: u32, spread: u32, format: PixelFormat) -> Self {
        self.render_size = render_size;
        self.spread = spread;
        self.pixel_format = format;
        self
    }

    /// Set the arena slot count
    #[must_use]
    pub const fn with_arena_slots(mut self, slots: usize) -> Self {
        self.arena_slots = slots;
        self
    }

    /// Set the arena backend
    #[must_use]
    pub const fn with_arena_backend(mut self, backend: ArenaBackend) -> Self {
        self.arena_backend = backend;
        self
    }

    /// Set the flush threshold
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the block lock timeout
    #[must_use]
    pub const fn with_block_lock_timeout(mut self, timeout: Duration) -> Self {
        self.block_lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable the block index table
    #[must_use]
    pub const fn with_index(mut self, write_index: bool) -> Self {
        self.write_index = write_index;
        self
    }

    /// Set the lost-write policy
    #[must_use]
    pub const fn with_lost_write_policy(mut self, policy: LostWritePolicy) -> Self {
        self.lost_write_policy = policy;
        self
    }
}
