use super::entry::{GlyphEntry, GLYPH_ENTRY_SIZE};
use super::header::{BlockFileHeader, BLOCK_HEADER_SIZE};
use super::index::{decode_index, index_slot, INDEX_EMPTY, INDEX_TABLE_SIZE};
use crate::block_id_for;
use crate::error::{FormatError, Result};
use binrw::BinReaderExt;
use std::io::Cursor;

/// Validated view of a block file's structure.
///
/// The layout holds the decoded header, entry table and index; payload
/// bytes stay in the caller's buffer (usually a memory mapping) and are
/// sliced through [`BlockLayout::payload`].
#[derive(Debug, Clone)]
pub struct BlockLayout {
    header: BlockFileHeader,
    entries: Vec<GlyphEntry>,
    index: Option<Vec<u32>>,
    payload_start: usize,
    payload_len: usize,
}

impl BlockLayout {
    /// Parse and validate `data` as the file for `expected_block`.
    ///
    /// Rejects bad magic, version or block id, entry counts above the
    /// block size, regions past the end of `data`, payload ranges outside
    /// the payload region, entries from another block and unsorted or
    /// duplicated codepoints.
    pub fn parse(data: &[u8], expected_block: u32) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(FormatError::TruncatedData {
                expected: BLOCK_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let header: BlockFileHeader = Cursor::new(&data[..BLOCK_HEADER_SIZE]).read_le()?;
        header.validate(expected_block)?;

        let count = header.entry_count as usize;
        let entries_end = BLOCK_HEADER_SIZE + count * GLYPH_ENTRY_SIZE;
        let payload_start = if header.has_index() {
            entries_end + INDEX_TABLE_SIZE
        } else {
            entries_end
        };
        if data.len() < payload_start {
            return Err(FormatError::TruncatedData {
                expected: payload_start,
                actual: data.len(),
            });
        }
        let payload_len = data.len() - payload_start;

        let mut cursor = Cursor::new(&data[BLOCK_HEADER_SIZE..entries_end]);
        let mut entries = Vec::with_capacity(count);
        for position in 0..count {
            let entry: GlyphEntry = cursor.read_le()?;
            if block_id_for(entry.codepoint) != header.block_id {
                return Err(FormatError::EntryOutsideBlock {
                    codepoint: entry.codepoint,
                    block_id: header.block_id,
                });
            }
            if entry.payload_range(payload_len).is_none() {
                return Err(FormatError::PayloadOutOfBounds {
                    codepoint: entry.codepoint,
                    offset: entry.data_offset,
                    size: entry.data_size,
                    payload_len,
                });
            }
            if let Some(prev) = entries.last().map(|e: &GlyphEntry| e.codepoint)
                && prev >= entry.codepoint
            {
                return Err(FormatError::UnsortedEntries(position));
            }
            entries.push(entry);
        }

        let index = header
            .has_index()
            .then(|| decode_index(&data[entries_end..payload_start]));

        Ok(Self {
            header,
            entries,
            index,
            payload_start,
            payload_len,
        })
    }

    /// Decoded header
    pub const fn header(&self) -> &BlockFileHeader {
        &self.header
    }

    /// Entries in ascending codepoint order
    pub fn entries(&self) -> &[GlyphEntry] {
        &self.entries
    }

    /// Whether the file carried a direct index table
    pub const fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Length of the payload region, padding included
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Find the entry for `codepoint`.
    ///
    /// Uses the direct index when present, verifying the slot's entry
    /// really is `codepoint`; otherwise binary searches the entry table.
    pub fn find(&self, codepoint: u32) -> Option<&GlyphEntry> {
        if let Some(index) = &self.index {
            let position = *index.get(index_slot(codepoint))?;
            if position == INDEX_EMPTY {
                return None;
            }
            return self
                .entries
                .get(position as usize)
                .filter(|entry| entry.codepoint == codepoint);
        }
        self.entries
            .binary_search_by_key(&codepoint, |entry| entry.codepoint)
            .ok()
            .and_then(|position| self.entries.get(position))
    }

    /// Bitmap bytes of `entry` within the file bytes `data`
    pub fn payload<'a>(&self, data: &'a [u8], entry: &GlyphEntry) -> Option<&'a [u8]> {
        let range = entry.payload_range(self.payload_len)?;
        data.get(self.payload_start + range.start..self.payload_start + range.end)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::block::builder::{BlockFileBuilder, GlyphBitmap};
    use crate::BLOCK_MAGIC;

    fn glyph(codepoint: u32, pixels: &[u8]) -> GlyphBitmap<'_> {
        GlyphBitmap {
            codepoint,
            width: 1,
            height: 1,
            bitmap_top: 0,
            bitmap_left: 0,
            pixels,
        }
    }

    fn sample(with_index: bool) -> Vec<u8> {
        let mut builder = BlockFileBuilder::new(1).with_index(with_index);
        builder.push(glyph(512, &[1, 2, 3, 4])).expect("push");
        builder.push(glyph(700, &[5, 6, 7, 8])).expect("push");
        builder.push(glyph(1023, &[9, 9, 9, 9])).expect("push");
        builder.build().expect("build")
    }

    #[test]
    fn test_find_with_and_without_index() {
        for with_index in [true, false] {
            let data = sample(with_index);
            let layout = BlockLayout::parse(&data, 1).expect("parse");
            assert_eq!(layout.has_index(), with_index);
            assert_eq!(layout.entries().len(), 3);

            let entry = layout.find(700).expect("present");
            assert_eq!(layout.payload(&data, entry), Some(&[5u8, 6, 7, 8][..]));
            assert!(layout.find(701).is_none());
            assert!(layout.find(700 + 512).is_none());
        }
    }

    #[test]
    fn test_flipped_magic_rejected() {
        let mut data = sample(true);
        data[0] ^= 0xFF;
        assert!(matches!(
            BlockLayout::parse(&data, 1),
            Err(FormatError::InvalidMagic {
                expected: BLOCK_MAGIC,
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_block_rejected() {
        let data = sample(false);
        assert!(matches!(
            BlockLayout::parse(&data, 2),
            Err(FormatError::BlockIdMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_bounds_checked() {
        let mut data = sample(false);
        // First entry's data_size lives at header + 0x10.
        let size_at = BLOCK_HEADER_SIZE + 0x10;
        data[size_at..size_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            BlockLayout::parse(&data, 1),
            Err(FormatError::PayloadOutOfBounds { codepoint: 512, .. })
        ));
    }

    #[test]
    fn test_unsorted_entries_rejected() {
        let mut data = sample(false);
        // Swap the codepoints of the first two entries.
        let first = BLOCK_HEADER_SIZE;
        let second = BLOCK_HEADER_SIZE + GLYPH_ENTRY_SIZE;
        data[first..first + 4].copy_from_slice(&700u32.to_le_bytes());
        data[second..second + 4].copy_from_slice(&512u32.to_le_bytes());
        assert!(matches!(
            BlockLayout::parse(&data, 1),
            Err(FormatError::UnsortedEntries(1))
        ));
    }

    #[test]
    fn test_truncated_tables_rejected() {
        let data = sample(true);
        let cut = BLOCK_HEADER_SIZE + 3 * GLYPH_ENTRY_SIZE + 10;
        assert!(matches!(
            BlockLayout::parse(&data[..cut], 1),
            Err(FormatError::TruncatedData { .. })
        ));
        assert!(BlockLayout::parse(&data[..20], 1).is_err());
    }
}
