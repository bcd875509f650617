use crate::error::{FormatError, Result};
use crate::key::CacheKey;
use crate::{CACHE_VERSION, MANIFEST_MAGIC};
use binrw::{BinRead, BinWrite};

/// Manifest snapshot header size in bytes.
pub const MANIFEST_HEADER_SIZE: usize = 24;

/// Manifest snapshot header (24 bytes)
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Magic (`MANIFEST_MAGIC`) |
/// | 0x04   | 4    | Version |
/// | 0x08   | 12   | Cache key |
/// | 0x14   | 4    | Entry count |
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ManifestHeader {
    /// Magic number
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Key the snapshot was built for
    pub key: CacheKey,
    /// Number of entries following the header
    pub entry_count: u32,
}

impl ManifestHeader {
    /// Create a header for `entry_count` entries under `key`
    pub const fn new(key: CacheKey, entry_count: u32) -> Self {
        Self {
            magic: MANIFEST_MAGIC,
            version: CACHE_VERSION,
            key,
            entry_count,
        }
    }

    /// Check magic and version
    pub fn validate(&self) -> Result<()> {
        if self.magic != MANIFEST_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: MANIFEST_MAGIC,
                actual: self.magic,
            });
        }
        if self.version != CACHE_VERSION {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    /// Check magic, version and that the stored key equals `key`
    pub fn validate_for(&self, key: &CacheKey) -> Result<()> {
        self.validate()?;
        if self.key != *key {
            return Err(FormatError::KeyMismatch);
        }
        Ok(())
    }

    /// Total snapshot size implied by the entry count
    pub fn snapshot_size(&self) -> usize {
        MANIFEST_HEADER_SIZE + self.entry_count as usize * super::MANIFEST_ENTRY_SIZE
    }
}
