use binrw::{BinRead, BinWrite};

/// Glyph entry size in bytes.
pub const GLYPH_ENTRY_SIZE: usize = 64;

/// One glyph record in the block entry table (64 bytes)
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0x00   | 4    | Codepoint |
/// | 0x04   | 2    | Bitmap width |
/// | 0x06   | 2    | Bitmap height |
/// | 0x08   | 2    | Bitmap top bearing |
/// | 0x0A   | 2    | Bitmap left bearing |
/// | 0x0C   | 4    | Payload offset |
/// | 0x10   | 4    | Payload size |
/// | 0x14   | 44   | Reserved (zero) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct GlyphEntry {
    /// Unicode codepoint
    pub codepoint: u32,
    /// Bitmap width in pixels
    pub width: u16,
    /// Bitmap height in pixels
    pub height: u16,
    /// Distance from the baseline to the bitmap top
    pub bitmap_top: i16,
    /// Distance from the pen position to the bitmap left edge
    pub bitmap_left: i16,
    /// Offset of the bitmap within the payload region
    pub data_offset: u32,
    /// Bitmap size in bytes
    #[brw(pad_after = 44)]
    pub data_size: u32,
}

impl GlyphEntry {
    /// Payload byte range, if it lies within `payload_len`
    pub fn payload_range(&self, payload_len: usize) -> Option<std::ops::Range<usize>> {
        let start = self.data_offset as usize;
        let end = start.checked_add(self.data_size as usize)?;
        (end <= payload_len).then_some(start..end)
    }
}
