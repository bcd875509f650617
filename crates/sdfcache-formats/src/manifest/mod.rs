//! Manifest snapshot and journal formats
//!
//! The manifest maps every cached codepoint to the block file holding its
//! bitmap. It is persisted as an immutable snapshot (`manifest.dat`) plus
//! an append-only journal (`manifest.jrn`) of the same 8-byte records.

mod entry;
mod header;
mod snapshot;

pub use entry::{decode_journal, encode_journal, ManifestEntry, MANIFEST_ENTRY_SIZE};
pub use header::{ManifestHeader, MANIFEST_HEADER_SIZE};
pub use snapshot::ManifestSnapshot;
