use crate::BLOCK_SIZE;

/// Empty index slot marker.
pub const INDEX_EMPTY: u32 = u32::MAX;

/// Size of the direct index table in bytes.
pub const INDEX_TABLE_SIZE: usize = BLOCK_SIZE as usize * 4;

/// Index slot for `codepoint`.
pub const fn index_slot(codepoint: u32) -> usize {
    (codepoint & (BLOCK_SIZE - 1)) as usize
}

/// Build the index table for entries already in table order.
pub(crate) fn build_index(codepoints: impl Iterator<Item = u32>) -> Vec<u8> {
    let mut slots = vec![INDEX_EMPTY; BLOCK_SIZE as usize];
    for (position, codepoint) in codepoints.enumerate() {
        slots[index_slot(codepoint)] = position as u32;
    }
    let mut out = Vec::with_capacity(INDEX_TABLE_SIZE);
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
    out
}

/// Decode an index table.
pub(crate) fn decode_index(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
