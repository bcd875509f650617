//! Process-wide block mapping cache and merge-on-write block writer.
//!
//! All font caches in a process share one [`BlockStore`] and therefore
//! one [`Arena`]. Reads never lock: writers publish complete files by
//! atomic rename, so a mapped file is always internally consistent.
//! Writes take the block's exclusive lock, merge the current file with
//! the staged glyphs and publish the result.

mod merge;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sdfcache_formats::block::max_block_file_size;
use sdfcache_formats::{
    block_id_for, BlockFileBuilder, BlockLayout, GlyphBitmap, GlyphEntry, ManifestEntry,
};
use tracing::{debug, warn};

use crate::arena::{allocation_granularity, Arena, ArenaStats};
use crate::config::StorageConfig;
use crate::directory::{write_synced, CacheDirectory};
use crate::glyph::GlyphRecord;
use crate::lock::{FileLock, LockMode};
use crate::{Result, StorageError};

use merge::{latest_per_codepoint, merge_sorted, Source};

/// Block store shared by every cache in the process.
pub type SharedBlockStore = Arc<Mutex<BlockStore>>;

/// Handle for a cache directory registered with a [`BlockStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId(u32);

impl CacheId {
    /// Numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    cache: CacheId,
    block: u32,
}

#[derive(Debug)]
struct MappedBlock {
    key: BlockKey,
    layout: BlockLayout,
}

/// A mapped, validated block file.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef<'a> {
    data: &'a [u8],
    layout: &'a BlockLayout,
}

impl<'a> BlockRef<'a> {
    /// Entry and bitmap for `codepoint`.
    pub fn find(&self, codepoint: u32) -> Option<(&'a GlyphEntry, &'a [u8])> {
        let entry = self.layout.find(codepoint)?;
        Some((entry, self.layout.payload(self.data, entry)?))
    }

    /// Entries in ascending codepoint order.
    pub fn entries(&self) -> &'a [GlyphEntry] {
        self.layout.entries()
    }

    /// Whether the file carries the direct index table.
    pub const fn has_index(&self) -> bool {
        self.layout.has_index()
    }
}

/// Mapping cache and writer for block files.
#[derive(Debug)]
pub struct BlockStore {
    arena: Arena,
    directories: Vec<Option<CacheDirectory>>,
    /// Mapped block per arena slot
    slots: Vec<Option<MappedBlock>>,
    by_key: HashMap<BlockKey, usize>,
    last_hit: Option<(BlockKey, usize)>,
    poisoned: HashSet<BlockKey>,
    redirects: HashMap<BlockKey, PathBuf>,
    write_index: bool,
    granularity: usize,
    lock_timeout: Duration,
    lock_poll: Duration,
}

impl BlockStore {
    /// Create a store with an arena sized for `config`'s cache key.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let arena = Arena::new(
            config.arena_slots,
            max_block_file_size(&config.key()),
            config.arena_backend,
        )?;
        let capacity = arena.capacity();
        Ok(Self {
            arena,
            directories: Vec::new(),
            slots: (0..capacity).map(|_| None).collect(),
            by_key: HashMap::new(),
            last_hit: None,
            poisoned: HashSet::new(),
            redirects: HashMap::new(),
            write_index: config.write_index,
            granularity: allocation_granularity(),
            lock_timeout: config.block_lock_timeout(),
            lock_poll: config.lock_poll_interval(),
        })
    }

    /// Create a store wrapped for sharing between caches and threads.
    pub fn shared(config: &StorageConfig) -> Result<SharedBlockStore> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    /// Register a cache directory.
    pub fn register(&mut self, directory: CacheDirectory) -> CacheId {
        let id = CacheId(self.directories.len() as u32);
        self.directories.push(Some(directory));
        id
    }

    /// Forget a cache directory: unmap its blocks and delete the files
    /// left behind by rename fallbacks.
    pub fn unregister(&mut self, cache: CacheId) {
        let keys: Vec<BlockKey> = self
            .by_key
            .keys()
            .filter(|key| key.cache == cache)
            .copied()
            .collect();
        for key in keys {
            self.release_block(key);
        }

        let stale: Vec<BlockKey> = self
            .redirects
            .keys()
            .filter(|key| key.cache == cache)
            .copied()
            .collect();
        for key in stale {
            if let Some(path) = self.redirects.remove(&key) {
                let _ = std::fs::remove_file(path);
            }
        }
        self.poisoned.retain(|key| key.cache != cache);

        if let Some(slot) = self.directories.get_mut(cache.0 as usize) {
            *slot = None;
        }
    }

    fn directory(&self, cache: CacheId) -> Result<&CacheDirectory> {
        self.directories
            .get(cache.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StorageError::UnknownCache(cache.0))
    }

    /// Arena occupancy.
    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Number of currently mapped blocks.
    pub fn mapped_blocks(&self) -> usize {
        self.by_key.len()
    }

    /// Whether `block` of `cache` has been disabled.
    pub fn is_poisoned(&self, cache: CacheId, block: u32) -> bool {
        self.poisoned.contains(&BlockKey { cache, block })
    }

    /// Fallback path serving `block` after a failed rename, if any.
    pub fn redirect(&self, cache: CacheId, block: u32) -> Option<&Path> {
        self.redirects
            .get(&BlockKey { cache, block })
            .map(PathBuf::as_path)
    }

    /// Map and validate a block, or return the existing mapping.
    ///
    /// Missing files, mapping failures and corrupt contents all yield
    /// `None`. When every slot is in use, all mappings are released first.
    pub fn get(&mut self, cache: CacheId, block: u32) -> Option<BlockRef<'_>> {
        let key = BlockKey { cache, block };
        let slot = match self.last_hit {
            Some((hit, slot)) if hit == key => slot,
            _ => {
                let slot = match self.by_key.get(&key) {
                    Some(&slot) => slot,
                    None => self.map_block(key)?,
                };
                self.last_hit = Some((key, slot));
                slot
            }
        };

        let mapped = self.slots.get(slot)?.as_ref()?;
        let data = self.arena.view(slot)?;
        Some(BlockRef {
            data,
            layout: &mapped.layout,
        })
    }

    /// Copy out the glyph for `codepoint` from `block`.
    pub fn lookup(&mut self, cache: CacheId, block: u32, codepoint: u32) -> Option<GlyphRecord> {
        let block_ref = self.get(cache, block)?;
        let (entry, pixels) = block_ref.find(codepoint)?;
        Some(GlyphRecord::from_entry(entry, pixels))
    }

    fn map_block(&mut self, key: BlockKey) -> Option<usize> {
        if self.poisoned.contains(&key) {
            return None;
        }
        let path = match self.redirects.get(&key) {
            Some(path) => path.clone(),
            None => self.directory(key.cache).ok()?.block_path(key.block),
        };
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to open block {}: {e}", path.display());
                return None;
            }
        };

        let slot = match self.arena.acquire_slot(key.block) {
            Some(slot) => slot,
            None => {
                debug!("Arena full, releasing all mapped blocks");
                self.release_all();
                self.arena.acquire_slot(key.block)?
            }
        };

        match self.arena.load_into(slot, &file) {
            Ok(_) => {}
            Err(e @ StorageError::SlotOverflow { .. }) => {
                warn!("Poisoning block {}: {e}", key.block);
                self.poisoned.insert(key);
                self.arena.release_slot(slot);
                return None;
            }
            Err(e) => {
                warn!("Failed to map block {}: {e}", path.display());
                self.arena.release_slot(slot);
                return None;
            }
        }

        let parsed = self
            .arena
            .view(slot)
            .map(|data| BlockLayout::parse(data, key.block));
        let layout = match parsed {
            Some(Ok(layout)) => layout,
            Some(Err(e)) => {
                warn!("Ignoring corrupt block {}: {e}", path.display());
                self.arena.release_slot(slot);
                return None;
            }
            None => {
                self.arena.release_slot(slot);
                return None;
            }
        };

        debug!(
            "Mapped block {} ({} entries) into slot {}",
            key.block,
            layout.entries().len(),
            slot
        );
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(MappedBlock { key, layout });
        }
        self.by_key.insert(key, slot);
        Some(slot)
    }

    fn release_block(&mut self, key: BlockKey) {
        if let Some(slot) = self.by_key.remove(&key) {
            if let Some(entry) = self.slots.get_mut(slot) {
                *entry = None;
            }
            self.arena.release_slot(slot);
        }
        if self.last_hit.is_some_and(|(hit, _)| hit == key) {
            self.last_hit = None;
        }
    }

    /// Unmap every block.
    pub fn release_all(&mut self) {
        self.arena.flush_all();
        for entry in &mut self.slots {
            *entry = None;
        }
        self.by_key.clear();
        self.last_hit = None;
    }

    /// Merge `pending` into `block` and publish the result.
    ///
    /// Takes the block's exclusive lock for the duration. Returns the
    /// manifest entries for the written codepoints. A result larger than
    /// an arena slot poisons the block.
    pub fn write(
        &mut self,
        cache: CacheId,
        block: u32,
        pending: &[GlyphRecord],
    ) -> Result<Vec<ManifestEntry>> {
        let key = BlockKey { cache, block };
        if self.poisoned.contains(&key) {
            return Err(StorageError::Poisoned(block));
        }
        if let Some(stray) = pending.iter().find(|g| block_id_for(g.codepoint) != block) {
            return Err(StorageError::InvariantViolation(format!(
                "U+{:04X} staged for block {block}",
                stray.codepoint
            )));
        }
        let directory = self.directory(cache)?.clone();

        let _lock = FileLock::acquire(
            &directory.block_lock_path(block),
            LockMode::Exclusive,
            self.lock_timeout,
            self.lock_poll,
        )?;

        // Drop our own view before the file is replaced.
        self.release_block(key);

        let source = self
            .redirects
            .get(&key)
            .cloned()
            .unwrap_or_else(|| directory.block_path(block));
        let existing = read_existing(&source, block);

        let latest = latest_per_codepoint(pending);
        let pending_cps: Vec<u32> = latest.iter().map(|g| g.codepoint).collect();
        let (existing_data, existing_layout) = match &existing {
            Some((data, layout)) => (data.as_slice(), Some(layout)),
            None => (&[][..], None),
        };
        let existing_entries = existing_layout.map_or(&[][..], BlockLayout::entries);
        let existing_cps: Vec<u32> = existing_entries.iter().map(|e| e.codepoint).collect();

        let mut builder = BlockFileBuilder::new(block)
            .with_index(self.write_index)
            .with_alignment(self.granularity);
        for source in merge_sorted(&existing_cps, &pending_cps) {
            match source {
                Source::Existing(i) => {
                    let (Some(entry), Some(layout)) = (existing_entries.get(i), existing_layout)
                    else {
                        continue;
                    };
                    let Some(pixels) = layout.payload(existing_data, entry) else {
                        continue;
                    };
                    builder.push(GlyphBitmap {
                        codepoint: entry.codepoint,
                        width: entry.width,
                        height: entry.height,
                        bitmap_top: entry.bitmap_top,
                        bitmap_left: entry.bitmap_left,
                        pixels,
                    })?;
                }
                Source::Pending(j) => {
                    if let Some(glyph) = latest.get(j) {
                        builder.push(glyph.as_bitmap())?;
                    }
                }
            }
        }

        let size = builder.file_size();
        if size > self.arena.slot_size() {
            self.poisoned.insert(key);
            let err = StorageError::SlotOverflow {
                block,
                size,
                slot_size: self.arena.slot_size(),
            };
            warn!("Poisoning block {block}: {err}");
            return Err(err);
        }

        let data = builder.build()?;
        self.publish(&directory, key, &data)?;
        debug!(
            "Wrote block {} with {} entries ({} new) to {}",
            block,
            builder.len(),
            latest.len(),
            directory.path().display()
        );

        Ok(pending_cps
            .into_iter()
            .map(ManifestEntry::for_codepoint)
            .collect())
    }

    fn publish(&mut self, directory: &CacheDirectory, key: BlockKey, data: &[u8]) -> Result<()> {
        let tmp = directory.block_tmp_path(key.block);
        if let Err(e) = write_synced(&tmp, data) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        let live = directory.block_path(key.block);
        match std::fs::rename(&tmp, &live) {
            Ok(()) => {
                if let Some(stale) = self.redirects.remove(&key) {
                    let _ = std::fs::remove_file(stale);
                }
                Ok(())
            }
            Err(e) => {
                let fallback = directory.block_old_path(key.block);
                warn!(
                    "Failed to replace {}: {e}; serving block from {}",
                    live.display(),
                    fallback.display()
                );
                match std::fs::rename(&tmp, &fallback) {
                    Ok(()) => {
                        self.redirects.insert(key, fallback);
                        Ok(())
                    }
                    Err(e) => {
                        let _ = std::fs::remove_file(&tmp);
                        Err(e.into())
                    }
                }
            }
        }
    }
}

fn read_existing(path: &Path, block: u32) -> Option<(Vec<u8>, BlockLayout)> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read block {}: {e}", path.display());
            return None;
        }
    };
    match BlockLayout::parse(&data, block) {
        Ok(layout) => Some((data, layout)),
        Err(e) => {
            warn!("Overwriting corrupt block {}: {e}", path.display());
            None
        }
    }
}
