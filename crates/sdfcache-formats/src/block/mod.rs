//! Block file format
//!
//! A block file stores the glyphs of one [`BLOCK_SIZE`](crate::BLOCK_SIZE)
//! codepoint partition:
//!
//! ```text
//! +--------------------+ 0
//! | BlockFileHeader    | 64 bytes
//! +--------------------+
//! | GlyphEntry * n     | 64 bytes each, ascending codepoint
//! +--------------------+
//! | index (optional)   | 512 * u32, present when FLAG_HAS_INDEX is set
//! +--------------------+
//! | payload            | bitmaps, padded to the allocation granularity
//! +--------------------+
//! ```
//!
//! Entry `data_offset` values are relative to the start of the payload.

mod builder;
mod entry;
mod header;
mod index;
mod layout;

pub use builder::{BlockFileBuilder, GlyphBitmap};
pub use entry::{GlyphEntry, GLYPH_ENTRY_SIZE};
pub use header::{BlockFileHeader, BLOCK_HEADER_SIZE, FLAG_HAS_INDEX};
pub use index::{index_slot, INDEX_EMPTY, INDEX_TABLE_SIZE};
pub use layout::BlockLayout;

use crate::key::CacheKey;
use crate::BLOCK_SIZE;

/// Largest block file `key` can produce before alignment padding: every
/// slot filled with a worst-case bitmap and the index table present.
pub const fn max_block_file_size(key: &CacheKey) -> usize {
    BLOCK_HEADER_SIZE
        + BLOCK_SIZE as usize * GLYPH_ENTRY_SIZE
        + INDEX_TABLE_SIZE
        + BLOCK_SIZE as usize * key.max_glyph_bytes()
}

/// Round `len` up to a multiple of `granularity` (no-op for 0 or 1).
pub const fn align_up(len: usize, granularity: usize) -> usize {
    if granularity <= 1 {
        return len;
    }
    len.div_ceil(granularity) * granularity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PixelFormat;

    #[test]
    fn test_max_block_file_size() {
        let key = CacheKey::new(64, 8, PixelFormat::Rgba8);
        assert_eq!(
            max_block_file_size(&key),
            64 + 512 * 64 + 2048 + 512 * 80 * 80 * 4
        );
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(17, 0), 17);
    }
}
