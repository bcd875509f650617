//! Error types for manifest and block parsing

use thiserror::Error;

/// Errors that can occur when parsing or building cache files
#[derive(Debug, Error)]
pub enum FormatError {
    /// Magic number does not match the expected file type
    #[error("Invalid magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidMagic {
        /// Expected magic value
        expected: u32,
        /// Magic found in the file
        actual: u32,
    },

    /// Unsupported format version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Stored cache key differs from the runtime key
    #[error("Cache key mismatch: file was built for a different render size, spread or format")]
    KeyMismatch,

    /// Block file belongs to another block
    #[error("Block id mismatch: expected {expected}, found {actual}")]
    BlockIdMismatch {
        /// Requested block id
        expected: u32,
        /// Block id stored in the header
        actual: u32,
    },

    /// More entries than one block can hold
    #[error("Too many entries in block: {0}")]
    TooManyEntries(u32),

    /// Data is too short for the expected format
    #[error("Truncated data: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        /// Expected minimum size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Entry payload range lies outside the payload region
    #[error(
        "Payload out of bounds for U+{codepoint:04X}: {offset}+{size} exceeds {payload_len}"
    )]
    PayloadOutOfBounds {
        /// Codepoint of the offending entry
        codepoint: u32,
        /// Entry data offset
        offset: u32,
        /// Entry data size
        size: u32,
        /// Length of the payload region
        payload_len: usize,
    },

    /// Entry codepoint does not belong to the block it is stored in
    #[error("U+{codepoint:04X} does not belong to block {block_id}")]
    EntryOutsideBlock {
        /// Offending codepoint
        codepoint: u32,
        /// Block the entry was found in
        block_id: u32,
    },

    /// Entries are not strictly ascending by codepoint
    #[error("Entries not sorted at index {0}")]
    UnsortedEntries(usize),

    /// Binary read/write error
    #[error("Binary parsing error: {0}")]
    BinRead(String),

    /// IO error during parsing or building
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for FormatError {
    fn from(e: binrw::Error) -> Self {
        Self::BinRead(e.to_string())
    }
}

/// Result type alias for format operations
pub type Result<T> = std::result::Result<T, FormatError>;
