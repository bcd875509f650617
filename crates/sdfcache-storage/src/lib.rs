//! Persistent, crash-consistent storage for distance-field glyph bitmaps.
//!
//! Generated bitmaps are grouped into block files of
//! [`BLOCK_SIZE`](sdfcache_formats::BLOCK_SIZE) codepoints. A manifest maps
//! codepoints to blocks and survives crashes through a snapshot plus an
//! append-only journal. Block files are mapped read-only into a fixed set
//! of arena slots, so the number of simultaneously mapped files is bounded
//! no matter how many fonts or blocks are in use.
//!
//! # Components
//!
//! - [`Arena`]: reserved address-space slots, one per mapped block
//! - [`BlockStore`]: process-wide mapping cache and merge-on-write block writer
//! - [`ManifestStore`]: codepoint to block map for one cache directory
//! - [`WriteBatcher`]: groups staged glyphs into block-sized flushes
//! - [`DiskCache`]: per-font facade tying the above together
//!
//! Every file operation that can race with another process goes through
//! [`FileLock`], which polls with a bounded timeout. Timeouts, missing
//! files and corrupt data are reported as misses rather than failures.
#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// Address-space arena
pub mod arena;
// Block mapping and rewriting
pub mod block_store;
// Write batching
pub mod batcher;
// Per-font cache facade
pub mod cache;
// Configuration
pub mod config;
// Cache directory naming and layout
pub mod directory;
// Glyph records
pub mod glyph;
// File locks
pub mod lock;
// Manifest snapshot and journal
pub mod manifest_store;

pub use arena::Arena;
pub use batcher::{FlushReport, WriteBatcher};
pub use block_store::{BlockStore, CacheId, SharedBlockStore};
pub use cache::DiskCache;
pub use config::{ArenaBackend, LostWritePolicy, StorageConfig};
pub use directory::CacheDirectory;
pub use glyph::GlyphRecord;
pub use lock::{FileLock, LockMode, MarkerLock};
pub use manifest_store::ManifestStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk data failed validation.
    #[error("Invalid format: {0}")]
    Format(#[from] sdfcache_formats::FormatError),

    /// A file lock could not be acquired in time.
    #[error("Timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout {
        /// Lock file path
        path: PathBuf,
        /// Time spent waiting
        waited: Duration,
    },

    /// Mapping or unmapping a region failed.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A block file is larger than an arena slot.
    #[error("Block {block} needs {size} bytes but arena slots hold {slot_size}")]
    SlotOverflow {
        /// Block id
        block: u32,
        /// Required size
        size: usize,
        /// Slot capacity
        slot_size: usize,
    },

    /// The block was disabled for the rest of the process.
    #[error("Block {0} is poisoned")]
    Poisoned(u32),

    /// Internal consistency check failed.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The cache id does not refer to an open cache directory.
    #[error("Unknown cache id {0}")]
    UnknownCache(u32),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether the error is a lock timeout.
    pub const fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
