//! Pooled backend: one independent read-only mapping per occupied slot.

use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use crate::{Result, StorageError};

/// Independent mappings, at most one per slot.
pub struct PooledSlots {
    maps: Vec<Option<Mmap>>,
}

impl PooledSlots {
    /// Create `slot_count` empty slots.
    pub fn new(slot_count: usize) -> Self {
        Self {
            maps: (0..slot_count).map(|_| None).collect(),
        }
    }

    /// Map `len` bytes of `file` into `slot`.
    pub fn map_file(&mut self, slot: usize, file: &File, len: usize) -> Result<()> {
        #[allow(unsafe_code)]
        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map(file)
                .map_err(|e| StorageError::Mapping(format!("failed to mmap block: {e}")))?
        };
        let entry = self
            .maps
            .get_mut(slot)
            .ok_or_else(|| StorageError::InvariantViolation(format!("slot {slot} out of range")))?;
        *entry = Some(mmap);
        Ok(())
    }

    /// Drop the mapping held by `slot`.
    pub fn restore(&mut self, slot: usize) {
        if let Some(entry) = self.maps.get_mut(slot) {
            *entry = None;
        }
    }

    /// View the first `len` bytes of `slot`.
    pub fn view(&self, slot: usize, len: usize) -> Option<&[u8]> {
        self.maps.get(slot)?.as_ref()?.get(..len)
    }
}
