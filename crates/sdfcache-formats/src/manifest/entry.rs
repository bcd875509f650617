use crate::block_id_for;

/// Manifest entry size in bytes.
pub const MANIFEST_ENTRY_SIZE: usize = 8;

/// One codepoint to block mapping.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Codepoint |
/// | 0x04   | 4    | Block id |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestEntry {
    /// Unicode codepoint
    pub codepoint: u32,
    /// Block file holding the glyph
    pub block_id: u32,
}

impl ManifestEntry {
    /// Entry for `codepoint` in the block that owns it
    pub const fn for_codepoint(codepoint: u32) -> Self {
        Self {
            codepoint,
            block_id: block_id_for(codepoint),
        }
    }

    /// Whether the entry respects the block partition
    pub const fn is_partitioned(&self) -> bool {
        block_id_for(self.codepoint) == self.block_id
    }

    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> [u8; MANIFEST_ENTRY_SIZE] {
        let mut buf = [0u8; MANIFEST_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.codepoint.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_id.to_le_bytes());
        buf
    }

    /// Parse an entry from bytes.
    pub fn from_bytes(data: &[u8; MANIFEST_ENTRY_SIZE]) -> Self {
        Self {
            codepoint: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            block_id: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        }
    }
}

/// Encode entries as raw journal records.
pub fn encode_journal(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * MANIFEST_ENTRY_SIZE);
    for entry in entries {
        out.extend_from_slice(&entry.to_bytes());
    }
    out
}

/// Decode raw journal records in file order.
///
/// A trailing partial record (an interrupted append) is ignored.
pub fn decode_journal(data: &[u8]) -> Vec<ManifestEntry> {
    data.chunks_exact(MANIFEST_ENTRY_SIZE)
        .filter_map(|chunk| <&[u8; MANIFEST_ENTRY_SIZE]>::try_from(chunk).ok())
        .map(ManifestEntry::from_bytes)
        .collect()
}
