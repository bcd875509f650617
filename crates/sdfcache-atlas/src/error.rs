//! Error types for atlas and glyph cache operations

use std::path::PathBuf;

use sdfcache_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the atlas layer
#[derive(Debug, Error)]
pub enum AtlasError {
    /// The texture allocator refused to create a page
    #[error("Failed to create {width}x{height} atlas texture: {reason}")]
    TextureCreation {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Allocator message
        reason: String,
    },

    /// Glyph cannot fit on an empty page
    #[error("Glyph U+{codepoint:04X} ({width}x{height}) does not fit a {page_size}px atlas page")]
    GlyphTooLarge {
        /// Codepoint of the glyph
        codepoint: u32,
        /// Bitmap width
        width: u32,
        /// Bitmap height
        height: u32,
        /// Atlas page edge length
        page_size: u32,
    },

    /// Pixel buffer length disagrees with the glyph dimensions
    #[error("Glyph U+{codepoint:04X} has {actual} pixel bytes, expected {expected}")]
    PixelDataMismatch {
        /// Codepoint of the glyph
        codepoint: u32,
        /// Bytes implied by width, height and format
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Another process holds the pregeneration marker
    #[error("Pregeneration already running (marker {})", .0.display())]
    PregenRunning(PathBuf),

    /// Codepoint range is empty or too large
    #[error("Invalid codepoint range U+{start:04X}..=U+{end:04X}")]
    InvalidRange {
        /// First codepoint
        start: u32,
        /// Last codepoint
        end: u32,
    },

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for atlas operations
pub type Result<T> = std::result::Result<T, AtlasError>;
