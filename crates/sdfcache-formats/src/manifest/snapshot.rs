use super::entry::{ManifestEntry, MANIFEST_ENTRY_SIZE};
use super::header::{ManifestHeader, MANIFEST_HEADER_SIZE};
use crate::error::{FormatError, Result};
use crate::key::CacheKey;
use crate::GlyphFormat;
use binrw::{BinReaderExt, BinWriterExt};
use std::io::Cursor;

/// Complete manifest snapshot (`manifest.dat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSnapshot {
    /// Snapshot header
    pub header: ManifestHeader,
    /// Entries in file order
    pub entries: Vec<ManifestEntry>,
}

impl ManifestSnapshot {
    /// Build a snapshot from entries
    pub fn new(key: CacheKey, entries: Vec<ManifestEntry>) -> Self {
        Self {
            header: ManifestHeader::new(key, entries.len() as u32),
            entries,
        }
    }

    /// Parse and require the stored key to equal `key`
    pub fn parse_for(data: &[u8], key: &CacheKey) -> Result<Self> {
        let snapshot = Self::parse(data)?;
        snapshot.header.validate_for(key)?;
        Ok(snapshot)
    }
}

impl GlyphFormat for ManifestSnapshot {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MANIFEST_HEADER_SIZE {
            return Err(FormatError::TruncatedData {
                expected: MANIFEST_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let header: ManifestHeader = Cursor::new(&data[..MANIFEST_HEADER_SIZE]).read_le()?;
        header.validate()?;

        let expected = header.snapshot_size();
        if data.len() < expected {
            return Err(FormatError::TruncatedData {
                expected,
                actual: data.len(),
            });
        }

        let entries = data[MANIFEST_HEADER_SIZE..expected]
            .chunks_exact(MANIFEST_ENTRY_SIZE)
            .filter_map(|chunk| <&[u8; MANIFEST_ENTRY_SIZE]>::try_from(chunk).ok())
            .map(ManifestEntry::from_bytes)
            .collect();

        Ok(Self { header, entries })
    }

    fn build(&self) -> Result<Vec<u8>> {
        let header = ManifestHeader {
            entry_count: self.entries.len() as u32,
            ..self.header
        };
        let mut cursor = Cursor::new(Vec::with_capacity(header.snapshot_size()));
        cursor.write_le(&header)?;
        let mut data = cursor.into_inner();
        for entry in &self.entries {
            data.extend_from_slice(&entry.to_bytes());
        }
        Ok(data)
    }
}
