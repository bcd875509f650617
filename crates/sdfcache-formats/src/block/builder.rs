use super::align_up;
use super::entry::GlyphEntry;
use super::header::BlockFileHeader;
use super::index::build_index;
use crate::block_id_for;
use crate::error::{FormatError, Result};
use binrw::BinWriterExt;
use std::io::Cursor;

/// Bitmap and metrics for one glyph being written to a block.
#[derive(Debug, Clone, Copy)]
pub struct GlyphBitmap<'a> {
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
    /// Pixel bytes
    pub pixels: &'a [u8],
}

/// Builder for block files.
///
/// Glyphs must be pushed in strictly ascending codepoint order and belong
/// to the builder's block. Payload offsets are assigned contiguously.
#[derive(Debug)]
pub struct BlockFileBuilder<'a> {
    block_id: u32,
    with_index: bool,
    alignment: usize,
    glyphs: Vec<GlyphBitmap<'a>>,
}

impl<'a> BlockFileBuilder<'a> {
    /// Create a builder for `block_id`
    pub const fn new(block_id: u32) -> Self {
        Self {
            block_id,
            with_index: true,
            alignment: 1,
            glyphs: Vec::new(),
        }
    }

    /// Whether to emit the direct index table (default: yes)
    pub const fn with_index(mut self, with_index: bool) -> Self {
        self.with_index = with_index;
        self
    }

    /// Pad the finished file to a multiple of `alignment` bytes
    pub const fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Number of glyphs pushed so far
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Whether no glyphs have been pushed
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Append a glyph
    pub fn push(&mut self, glyph: GlyphBitmap<'a>) -> Result<()> {
        if block_id_for(glyph.codepoint) != self.block_id {
            return Err(FormatError::EntryOutsideBlock {
                codepoint: glyph.codepoint,
                block_id: self.block_id,
            });
        }
        if self
            .glyphs
            .last()
            .is_some_and(|last| last.codepoint >= glyph.codepoint)
        {
            return Err(FormatError::UnsortedEntries(self.glyphs.len()));
        }
        self.glyphs.push(glyph);
        Ok(())
    }

    /// Size of the finished file, alignment padding included
    pub fn file_size(&self) -> usize {
        let tables = super::BLOCK_HEADER_SIZE
            + self.glyphs.len() * super::GLYPH_ENTRY_SIZE
            + if self.with_index {
                super::INDEX_TABLE_SIZE
            } else {
                0
            };
        let payload: usize = self.glyphs.iter().map(|g| g.pixels.len()).sum();
        align_up(tables + payload, self.alignment)
    }

    /// Serialize the block file
    pub fn build(&self) -> Result<Vec<u8>> {
        let total = self.file_size();
        let header = BlockFileHeader::new(self.block_id, self.glyphs.len() as u32, self.with_index);

        let mut cursor = Cursor::new(Vec::with_capacity(total));
        cursor.write_le(&header)?;
        let mut offset = 0u32;
        for glyph in &self.glyphs {
            let entry = GlyphEntry {
                codepoint: glyph.codepoint,
                width: glyph.width,
                height: glyph.height,
                bitmap_top: glyph.bitmap_top,
                bitmap_left: glyph.bitmap_left,
                data_offset: offset,
                data_size: glyph.pixels.len() as u32,
            };
            cursor.write_le(&entry)?;
            offset = offset.saturating_add(entry.data_size);
        }

        let mut data = cursor.into_inner();
        if self.with_index {
            data.extend_from_slice(&build_index(self.glyphs.iter().map(|g| g.codepoint)));
        }
        for glyph in &self.glyphs {
            data.extend_from_slice(glyph.pixels);
        }
        data.resize(total, 0);
        Ok(data)
    }
}
