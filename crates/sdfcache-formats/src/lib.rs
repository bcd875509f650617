//! On-disk formats for the sdfcache glyph cache.
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
//! Every cache directory holds three kinds of file, all little-endian and
//! built from fixed-size records:
//!
//! - **Manifest snapshot** (`manifest.dat`): a 24-byte [`ManifestHeader`]
//!   followed by `entry_count` 8-byte [`ManifestEntry`] records.
//! - **Manifest journal** (`manifest.jrn`): raw, unframed `ManifestEntry`
//!   records appended after every flush.
//! - **Block file** (`block_<id>.dat`): a 64-byte [`BlockFileHeader`], the
//!   sorted 64-byte [`GlyphEntry`] table, an optional direct-mapped index of
//!   [`BLOCK_SIZE`] `u32` slots and the glyph payload bytes.
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: every record can be parsed and built
//! - **Validate, Don't Trust**: parsers check bounds before handing out views
//! - **Corruption Is Absence**: callers treat any [`FormatError`] as a miss

#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod key;
pub mod manifest;

pub use block::{
    BlockFileBuilder, BlockFileHeader, BlockLayout, GlyphBitmap, GlyphEntry, BLOCK_HEADER_SIZE,
    GLYPH_ENTRY_SIZE,
};
pub use error::{FormatError, Result};
pub use key::{CacheKey, PixelFormat};
pub use manifest::{ManifestEntry, ManifestHeader, ManifestSnapshot, MANIFEST_ENTRY_SIZE};

/// Number of codepoints covered by one block file.
///
/// Must stay a power of two: the direct index uses `codepoint & (BLOCK_SIZE - 1)`.
pub const BLOCK_SIZE: u32 = 512;

/// Format version shared by manifest and block files.
pub const CACHE_VERSION: u32 = 1;

/// Block file magic (`"BDSM"` read as a little-endian u32).
pub const BLOCK_MAGIC: u32 = 0x4D53_4442;

/// Manifest snapshot magic (`"FMSM"` read as a little-endian u32).
pub const MANIFEST_MAGIC: u32 = 0x4D53_4D46;

const _: () = assert!(BLOCK_SIZE.is_power_of_two());

/// Block that owns `codepoint`.
pub const fn block_id_for(codepoint: u32) -> u32 {
    codepoint >> BLOCK_SIZE.trailing_zeros()
}

/// First codepoint covered by `block_id`.
pub const fn block_first_codepoint(block_id: u32) -> u32 {
    block_id.saturating_mul(BLOCK_SIZE)
}

/// Common trait for whole-file formats.
pub trait GlyphFormat: Sized {
    /// Parse from bytes
    fn parse(data: &[u8]) -> Result<Self>;

    /// Build to bytes
    fn build(&self) -> Result<Vec<u8>>;
}
