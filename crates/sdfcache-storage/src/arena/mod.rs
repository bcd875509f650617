//! Fixed-size arena of address-space slots for mapped block files.
//!
//! The arena owns every mapping the storage layer makes. Each slot holds
//! at most one block file; the number of slots bounds how many block files
//! can be mapped at once. Slots are handed out lowest-free-first from a
//! `u64` bitmap, which caps the arena at 64 slots.

#[cfg(unix)]
mod platform_unix;
mod pooled;

use std::fs::File;

use tracing::{debug, warn};

use crate::config::{ArenaBackend, MAX_ARENA_SLOTS};
use crate::{Result, StorageError};

use pooled::PooledSlots;

/// Round `len` up to a multiple of `granularity`.
pub(crate) const fn round_up(len: usize, granularity: usize) -> usize {
    len.div_ceil(granularity) * granularity
}

/// Granularity block files are padded to and slots are sized in.
pub fn allocation_granularity() -> usize {
    #[cfg(unix)]
    {
        platform_unix::page_size()
    }
    #[cfg(not(unix))]
    {
        64 * 1024
    }
}

enum Backend {
    #[cfg(unix)]
    Reserved(platform_unix::ReservedRegion),
    Pooled(PooledSlots),
}

/// Occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Slots in the arena
    pub capacity: usize,
    /// Slots currently holding a block
    pub occupied: usize,
    /// Highest `occupied` value ever observed
    pub peak_occupied: usize,
    /// Number of `flush_all` calls
    pub flushes: u64,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    block: u32,
    len: usize,
}

/// Arena of address-space slots.
pub struct Arena {
    backend: Backend,
    slot_size: usize,
    slots: Vec<Option<SlotState>>,
    free_mask: u64,
    peak_occupied: usize,
    flushes: u64,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("reserved", &self.is_reserved())
            .field("slot_size", &self.slot_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Create an arena of `slot_count` slots able to hold files of up to
    /// `max_file_size` bytes each.
    pub fn new(slot_count: usize, max_file_size: usize, backend: ArenaBackend) -> Result<Self> {
        if slot_count == 0 || slot_count > MAX_ARENA_SLOTS {
            return Err(StorageError::Config(format!(
                "arena slot count must be within 1..={MAX_ARENA_SLOTS}, got {slot_count}"
            )));
        }
        let slot_size = round_up(max_file_size.max(1), allocation_granularity());

        let backend = match backend {
            ArenaBackend::Pooled => Backend::Pooled(PooledSlots::new(slot_count)),
            ArenaBackend::Reserved => Self::reserved(slot_count, slot_size)?,
            ArenaBackend::Auto => Self::reserved(slot_count, slot_size).unwrap_or_else(|e| {
                warn!("Address-space reservation unavailable, using pooled mappings: {e}");
                Backend::Pooled(PooledSlots::new(slot_count))
            }),
        };

        let free_mask = if slot_count == 64 {
            u64::MAX
        } else {
            (1u64 << slot_count) - 1
        };

        debug!(
            "Arena ready: {} slots of {} bytes ({})",
            slot_count,
            slot_size,
            if matches!(backend, Backend::Pooled(_)) {
                "pooled"
            } else {
                "reserved"
            }
        );

        Ok(Self {
            backend,
            slot_size,
            slots: vec![None; slot_count],
            free_mask,
            peak_occupied: 0,
            flushes: 0,
        })
    }

    #[cfg(unix)]
    fn reserved(slot_count: usize, slot_size: usize) -> Result<Backend> {
        platform_unix::ReservedRegion::reserve(slot_count, slot_size).map(Backend::Reserved)
    }

    #[cfg(not(unix))]
    fn reserved(_slot_count: usize, _slot_size: usize) -> Result<Backend> {
        Err(StorageError::Mapping(
            "address-space reservation is only implemented on unix".into(),
        ))
    }

    /// Whether slots are backed by a single reservation.
    pub const fn is_reserved(&self) -> bool {
        !matches!(self.backend, Backend::Pooled(_))
    }

    /// Capacity of one slot in bytes.
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.len() - self.free_mask.count_ones() as usize
    }

    /// Occupancy counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity(),
            occupied: self.occupied(),
            peak_occupied: self.peak_occupied,
            flushes: self.flushes,
        }
    }

    /// Claim the lowest free slot for `block`.
    pub fn acquire_slot(&mut self, block: u32) -> Option<usize> {
        if self.free_mask == 0 {
            return None;
        }
        let slot = self.free_mask.trailing_zeros() as usize;
        self.free_mask &= !(1u64 << slot);
        if let Some(state) = self.slots.get_mut(slot) {
            *state = Some(SlotState { block, len: 0 });
        }
        self.peak_occupied = self.peak_occupied.max(self.occupied());
        Some(slot)
    }

    /// Map `file` read-only into `slot`, sized to the file.
    ///
    /// Files larger than a slot are rejected with [`StorageError::SlotOverflow`].
    pub fn load_into(&mut self, slot: usize, file: &File) -> Result<usize> {
        let state = self
            .slots
            .get(slot)
            .copied()
            .flatten()
            .ok_or_else(|| StorageError::InvariantViolation(format!("slot {slot} not acquired")))?;

        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| StorageError::Mapping("file size exceeds address space".into()))?;
        if len > self.slot_size {
            return Err(StorageError::SlotOverflow {
                block: state.block,
                size: len,
                slot_size: self.slot_size,
            });
        }
        if len == 0 {
            return Err(StorageError::Mapping(format!(
                "block {} file is empty",
                state.block
            )));
        }

        match &mut self.backend {
            #[cfg(unix)]
            Backend::Reserved(region) => region.map_file(slot, file, len)?,
            Backend::Pooled(pool) => pool.map_file(slot, file, len)?,
        }
        if let Some(Some(state)) = self.slots.get_mut(slot) {
            state.len = len;
        }
        Ok(len)
    }

    /// Bytes mapped in `slot`, if it holds a loaded file.
    pub fn view(&self, slot: usize) -> Option<&[u8]> {
        let state = (*self.slots.get(slot)?)?;
        if state.len == 0 {
            return None;
        }
        match &self.backend {
            #[cfg(unix)]
            Backend::Reserved(region) => Some(region.view(slot, state.len)),
            Backend::Pooled(pool) => pool.view(slot, state.len),
        }
    }

    /// Unmap `slot`, restore its reservation and mark it free.
    pub fn release_slot(&mut self, slot: usize) {
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };
        let Some(state) = entry.take() else {
            return;
        };
        if state.len > 0 {
            match &mut self.backend {
                #[cfg(unix)]
                Backend::Reserved(region) => {
                    if let Err(e) = region.restore(slot) {
                        warn!("Failed to restore slot {slot}: {e}");
                    }
                }
                Backend::Pooled(pool) => pool.restore(slot),
            }
        }
        self.free_mask |= 1u64 << slot;
    }

    /// Release every occupied slot.
    pub fn flush_all(&mut self) {
        for slot in 0..self.slots.len() {
            self.release_slot(slot);
        }
        self.flushes += 1;
        debug!("Arena flushed ({} total)", self.flushes);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for slot in 0..self.slots.len() {
            self.release_slot(slot);
        }
    }
}
