//! Reserved address-space backend using anonymous `PROT_NONE` mappings.
//!
//! The whole arena is reserved once. Loading a block maps the file over
//! the start of its slot with `MAP_FIXED`; releasing it maps a fresh
//! inaccessible reservation back over the full slot, so the address range
//! is never handed back to the allocator while the arena lives.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::ptr;

use libc::{c_void, mmap, munmap, size_t};
use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED, MAP_PRIVATE, MAP_SHARED, PROT_NONE, PROT_READ};

use crate::{Result, StorageError};

#[cfg(target_os = "linux")]
const MAP_NORESERVE: libc::c_int = libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const MAP_NORESERVE: libc::c_int = 0;

/// Page size reported by the OS.
#[allow(unsafe_code)]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
}

/// One contiguous reservation split into equal slots.
#[allow(unsafe_code)]
pub struct ReservedRegion {
    base: *mut c_void,
    slot_size: usize,
    slot_count: usize,
}

impl ReservedRegion {
    /// Reserve `slot_count * slot_size` bytes of inaccessible address space.
    ///
    /// `slot_size` must be a multiple of the page size.
    #[allow(unsafe_code)]
    pub fn reserve(slot_count: usize, slot_size: usize) -> Result<Self> {
        let total = slot_count
            .checked_mul(slot_size)
            .ok_or_else(|| StorageError::Mapping("arena size overflows usize".into()))?;

        // SAFETY: anonymous mapping at a kernel-chosen address; nothing is
        // aliased and the result is checked below.
        let base = unsafe {
            mmap(
                ptr::null_mut(),
                total as size_t,
                PROT_NONE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == MAP_FAILED {
            return Err(StorageError::Mapping(format!(
                "failed to reserve {total} bytes: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self {
            base,
            slot_size,
            slot_count,
        })
    }

    fn slot_addr(&self, slot: usize) -> *mut c_void {
        self.base.cast::<u8>().wrapping_add(slot * self.slot_size).cast()
    }

    /// Map `len` bytes of `file` read-only at the start of `slot`.
    #[allow(unsafe_code)]
    pub fn map_file(&self, slot: usize, file: &File, len: usize) -> Result<()> {
        debug_assert!(slot < self.slot_count);
        let mapped = super::round_up(len, page_size());
        if mapped > self.slot_size {
            return Err(StorageError::Mapping(format!(
                "{mapped} bytes do not fit a {} byte slot",
                self.slot_size
            )));
        }

        // SAFETY: the target range lies inside our own reservation and is
        // not referenced by any live slice (the slot is free or was just
        // restored), so replacing it with MAP_FIXED cannot invalidate
        // borrowed data.
        let addr = unsafe {
            mmap(
                self.slot_addr(slot),
                mapped as size_t,
                PROT_READ,
                MAP_SHARED | MAP_FIXED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            self.restore(slot)?;
            return Err(StorageError::Mapping(format!(
                "failed to map file into slot {slot}: {err}"
            )));
        }
        Ok(())
    }

    /// Replace whatever is mapped in `slot` with a fresh reservation.
    #[allow(unsafe_code)]
    pub fn restore(&self, slot: usize) -> Result<()> {
        // SAFETY: same range argument as `map_file`; callers drop every
        // view of the slot before restoring it.
        let addr = unsafe {
            mmap(
                self.slot_addr(slot),
                self.slot_size as size_t,
                PROT_NONE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE | MAP_FIXED,
                -1,
                0,
            )
        };
        if addr == MAP_FAILED {
            return Err(StorageError::Mapping(format!(
                "failed to restore reservation for slot {slot}: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// View the first `len` bytes of `slot`.
    ///
    /// The caller must only ask for bytes it previously mapped.
    #[allow(unsafe_code)]
    pub fn view(&self, slot: usize, len: usize) -> &[u8] {
        debug_assert!(len <= self.slot_size);
        // SAFETY: the slot holds a readable file mapping of at least `len`
        // bytes; the slice borrows `self`, and remapping requires the
        // arena to be borrowed mutably.
        unsafe { std::slice::from_raw_parts(self.slot_addr(slot).cast::<u8>(), len) }
    }
}

impl Drop for ReservedRegion {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: unmapping the exact range reserved in `reserve`.
        unsafe {
            munmap(self.base, (self.slot_count * self.slot_size) as size_t);
        }
    }
}

// SAFETY: the region is plain address space owned by this value; all
// mutation goes through `&mut Arena`, so moving it between threads is sound.
#[allow(unsafe_code)]
unsafe impl Send for ReservedRegion {}

// SAFETY: shared access only produces read-only views of mapped files.
#[allow(unsafe_code)]
unsafe impl Sync for ReservedRegion {}
