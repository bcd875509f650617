use crate::error::{FormatError, Result};
use crate::{BLOCK_MAGIC, BLOCK_SIZE, CACHE_VERSION};
use binrw::{BinRead, BinWrite};

/// Block file header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 64;

/// Header flag: the direct index table follows the entry table.
pub const FLAG_HAS_INDEX: u32 = 1;

/// Block file header (64 bytes)
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Magic (`BLOCK_MAGIC`) |
/// | 0x04   | 4    | Version |
/// | 0x08   | 4    | Block id |
/// | 0x0C   | 4    | Entry count |
/// | 0x10   | 4    | Flags |
/// | 0x14   | 44   | Reserved (zero) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockFileHeader {
    /// Magic number
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Block this file stores
    pub block_id: u32,
    /// Number of glyph entries
    pub entry_count: u32,
    /// Flag bits
    #[brw(pad_after = 44)]
    pub flags: u32,
}

impl BlockFileHeader {
    /// Create a header for `block_id`
    pub const fn new(block_id: u32, entry_count: u32, with_index: bool) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            version: CACHE_VERSION,
            block_id,
            entry_count,
            flags: if with_index { FLAG_HAS_INDEX } else { 0 },
        }
    }

    /// Whether the direct index table is present
    pub const fn has_index(&self) -> bool {
        self.flags & FLAG_HAS_INDEX != 0
    }

    /// Validate header fields against the block being loaded
    pub fn validate(&self, expected_block: u32) -> Result<()> {
        if self.magic != BLOCK_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: BLOCK_MAGIC,
                actual: self.magic,
            });
        }
        if self.version != CACHE_VERSION {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        if self.block_id != expected_block {
            return Err(FormatError::BlockIdMismatch {
                expected: expected_block,
                actual: self.block_id,
            });
        }
        if self.entry_count > BLOCK_SIZE {
            return Err(FormatError::TooManyEntries(self.entry_count));
        }
        Ok(())
    }
}
