//! Sorted merge of persisted and newly staged glyphs.

use std::collections::BTreeMap;

use crate::glyph::GlyphRecord;

/// Where a merged entry's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Index into the existing entry table
    Existing(usize),
    /// Index into the deduplicated pending list
    Pending(usize),
}

/// Pending glyphs in ascending codepoint order, keeping only the most
/// recently staged copy of each codepoint.
pub(crate) fn latest_per_codepoint(pending: &[GlyphRecord]) -> Vec<&GlyphRecord> {
    let mut latest = BTreeMap::new();
    for glyph in pending {
        latest.insert(glyph.codepoint, glyph);
    }
    latest.into_values().collect()
}

/// Two-pointer merge of two strictly ascending codepoint lists.
///
/// Equal codepoints consume both sides and take the pending copy.
pub(crate) fn merge_sorted(existing: &[u32], pending: &[u32]) -> Vec<Source> {
    let mut out = Vec::with_capacity(existing.len() + pending.len());
    let (mut i, mut j) = (0, 0);
    while i < existing.len() && j < pending.len() {
        match existing[i].cmp(&pending[j]) {
            std::cmp::Ordering::Less => {
                out.push(Source::Existing(i));
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(Source::Pending(j));
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(Source::Pending(j));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend((i..existing.len()).map(Source::Existing));
    out.extend((j..pending.len()).map(Source::Pending));
    out
}
