//! Codepoint to block map for one cache directory.
//!
//! The map is persisted as a snapshot (`manifest.dat`) plus a journal
//! (`manifest.jrn`) of raw entries appended after every flush. Loading
//! replays the journal over the snapshot, so entries survive a crash
//! between the journal append and the snapshot rewrite. Saving writes the
//! snapshot to a temporary file, renames it into place and then deletes
//! the journal.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use sdfcache_formats::manifest::{decode_journal, encode_journal};
use sdfcache_formats::{CacheKey, GlyphFormat, ManifestEntry, ManifestSnapshot};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::directory::{write_synced, CacheDirectory};
use crate::lock::{FileLock, LockMode};
use crate::Result;

/// Manifest for one cache directory.
#[derive(Debug)]
pub struct ManifestStore {
    directory: CacheDirectory,
    key: CacheKey,
    entries: HashMap<u32, u32>,
    max_bytes: u64,
    shared_timeout: Duration,
    exclusive_timeout: Duration,
    poll: Duration,
}

impl ManifestStore {
    /// Empty manifest for `directory`; call [`load`](Self::load) to read it.
    pub fn new(directory: CacheDirectory, config: &StorageConfig) -> Self {
        Self {
            directory,
            key: config.key(),
            entries: HashMap::new(),
            max_bytes: config.max_manifest_bytes,
            shared_timeout: config.manifest_shared_timeout(),
            exclusive_timeout: config.manifest_exclusive_timeout(),
            poll: config.lock_poll_interval(),
        }
    }

    /// Number of mapped codepoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Block holding `codepoint`.
    pub fn lookup(&self, codepoint: u32) -> Option<u32> {
        self.entries.get(&codepoint).copied()
    }

    /// Replace the in-memory map with the snapshot plus journal on disk.
    ///
    /// A snapshot with a foreign key, bad magic or version, or a size over
    /// the sanity ceiling invalidates the journal as well and leaves the
    /// manifest empty. A missing snapshot with a journal replays just the
    /// journal. Entries that break the block partition are skipped.
    pub fn load(&mut self) -> Result<()> {
        let _lock = FileLock::acquire(
            &self.directory.manifest_lock_path(),
            LockMode::Shared,
            self.shared_timeout,
            self.poll,
        )?;
        self.entries = self.read_disk()?;
        info!(
            "Loaded manifest with {} entries from {}",
            self.entries.len(),
            self.directory.path().display()
        );
        Ok(())
    }

    /// Snapshot plus journal as currently on disk. The caller holds a lock.
    fn read_disk(&self) -> Result<HashMap<u32, u32>> {
        let mut map = HashMap::new();
        let snapshot = self.read_capped(&self.directory.manifest_path())?;
        let journal = self.read_capped(&self.directory.journal_path())?;

        if let Some(bytes) = snapshot {
            match ManifestSnapshot::parse_for(&bytes, &self.key) {
                Ok(snapshot) => apply_to(&mut map, &snapshot.entries),
                Err(e) => {
                    warn!(
                        "Ignoring manifest in {}: {e}",
                        self.directory.path().display()
                    );
                    return Ok(map);
                }
            }
        }

        if let Some(bytes) = journal {
            let replayed = decode_journal(&bytes);
            debug!("Replaying {} journal entries", replayed.len());
            apply_to(&mut map, &replayed);
        }
        Ok(map)
    }

    fn read_capped(&self, path: &std::path::Path) -> Result<Option<Vec<u8>>> {
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > self.max_bytes {
            warn!(
                "Ignoring {} ({} bytes exceeds {})",
                path.display(),
                len,
                self.max_bytes
            );
            return Ok(None);
        }
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply entries in order; later entries overwrite earlier ones.
    pub fn apply(&mut self, entries: &[ManifestEntry]) {
        apply_to(&mut self.entries, entries);
    }

    /// Take the manifest's exclusive lock.
    pub fn lock_exclusive(&self) -> Result<FileLock> {
        FileLock::acquire(
            &self.directory.manifest_lock_path(),
            LockMode::Exclusive,
            self.exclusive_timeout,
            self.poll,
        )
    }

    /// Append raw records to the journal and sync them.
    ///
    /// The caller must hold the exclusive lock.
    pub fn append_journal(&self, _lock: &FileLock, entries: &[ManifestEntry]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.journal_path())?;
        file.write_all(&encode_journal(entries))?;
        file.sync_all()?;
        Ok(())
    }

    /// Write a full snapshot and delete the journal, taking the lock.
    pub fn save(&self) -> Result<()> {
        let lock = self.lock_exclusive()?;
        self.save_locked(&lock)
    }

    /// Write a full snapshot and delete the journal under a held lock.
    pub fn save_locked(&self, _lock: &FileLock) -> Result<()> {
        let mut entries: Vec<ManifestEntry> = self
            .entries
            .iter()
            .map(|(&codepoint, &block_id)| ManifestEntry {
                codepoint,
                block_id,
            })
            .collect();
        entries.sort_unstable();
        let data = ManifestSnapshot::new(self.key, entries).build()?;

        let tmp = self.directory.manifest_tmp_path();
        let published = write_synced(&tmp, &data).and_then(|()| {
            std::fs::rename(&tmp, self.directory.manifest_path()).map_err(Into::into)
        });
        if let Err(e) = published {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        match std::fs::remove_file(self.directory.journal_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Saved manifest snapshot with {} entries", self.entries.len());
        Ok(())
    }

    /// Record `deltas`: apply them in memory, then under one exclusive lock
    /// append them to the journal and rewrite the snapshot.
    ///
    /// Entries other processes committed since the last load are folded in
    /// before the snapshot is rewritten, so concurrent writers never erase
    /// each other's work.
    ///
    /// An error means the deltas may not be durable yet; they are already
    /// applied in memory and can be committed again later. A failed
    /// snapshot rewrite after a successful journal append is not an error.
    pub fn commit(&mut self, deltas: &[ManifestEntry]) -> Result<()> {
        self.apply(deltas);
        let lock = self.lock_exclusive()?;
        self.append_journal(&lock, deltas)?;
        match self.read_disk() {
            Ok(disk) => {
                for (codepoint, block_id) in disk {
                    self.entries.entry(codepoint).or_insert(block_id);
                }
            }
            Err(e) => warn!("Could not merge on-disk manifest: {e}"),
        }
        if let Err(e) = self.save_locked(&lock) {
            warn!("Snapshot rewrite failed, journal retained: {e}");
        }
        Ok(())
    }
}

fn apply_to(map: &mut HashMap<u32, u32>, entries: &[ManifestEntry]) {
    for entry in entries {
        if entry.is_partitioned() {
            map.insert(entry.codepoint, entry.block_id);
        } else {
            debug!(
                "Skipping U+{:04X} mapped to foreign block {}",
                entry.codepoint, entry.block_id
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sdfcache_formats::PixelFormat;

    fn setup() -> (tempfile::TempDir, StorageConfig, CacheDirectory) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::new(tmp.path());
        let directory = CacheDirectory::at(tmp.path().join("font"));
        directory.create().expect("mkdir");
        (tmp, config, directory)
    }

    #[test]
    fn test_empty_directory_loads_empty() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory, &config);
        manifest.load().expect("load");
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_commit_then_reload() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory.clone(), &config);
        manifest
            .commit(&[
                ManifestEntry::for_codepoint(0x41),
                ManifestEntry::for_codepoint(0x4E00),
            ])
            .expect("commit");
        assert!(!directory.journal_path().exists());

        let mut reloaded = ManifestStore::new(directory, &config);
        reloaded.load().expect("load");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup(0x4E00), Some(0x4E00 / 512));
    }

    #[test]
    fn test_journal_replayed_without_snapshot_rewrite() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory.clone(), &config);
        manifest
            .commit(&[ManifestEntry::for_codepoint(0x20)])
            .expect("commit");

        // Journal append that was never folded into the snapshot.
        let lock = manifest.lock_exclusive().expect("lock");
        manifest
            .append_journal(&lock, &[ManifestEntry::for_codepoint(0x21)])
            .expect("append");
        drop(lock);

        let mut reloaded = ManifestStore::new(directory, &config);
        reloaded.load().expect("load");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup(0x21), Some(0));
    }

    #[test]
    fn test_foreign_key_discards_snapshot_and_journal() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory.clone(), &config);
        manifest
            .commit(&[ManifestEntry::for_codepoint(0x20)])
            .expect("commit");
        let lock = manifest.lock_exclusive().expect("lock");
        manifest
            .append_journal(&lock, &[ManifestEntry::for_codepoint(0x21)])
            .expect("append");
        drop(lock);

        let other = config.with_render(64, 8, PixelFormat::Rgba16);
        let mut reloaded = ManifestStore::new(directory, &other);
        reloaded.load().expect("load");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_oversized_snapshot_ignored() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory.clone(), &config);
        manifest
            .commit(&[ManifestEntry::for_codepoint(1), ManifestEntry::for_codepoint(2)])
            .expect("commit");

        let mut tight = config;
        tight.max_manifest_bytes = 30;
        let mut reloaded = ManifestStore::new(directory, &tight);
        reloaded.load().expect("load");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_commit_folds_in_other_writers() {
        let (_tmp, config, directory) = setup();
        let mut first = ManifestStore::new(directory.clone(), &config);
        let mut second = ManifestStore::new(directory.clone(), &config);
        first.load().expect("load");
        second.load().expect("load");

        first
            .commit(&[ManifestEntry::for_codepoint(0x41)])
            .expect("first");
        second
            .commit(&[ManifestEntry::for_codepoint(0x42)])
            .expect("second");
        assert_eq!(second.len(), 2);

        let mut reloaded = ManifestStore::new(directory, &config);
        reloaded.load().expect("load");
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_foreign_block_entries_skipped() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory, &config);
        manifest.apply(&[
            ManifestEntry {
                codepoint: 0x41,
                block_id: 9,
            },
            ManifestEntry::for_codepoint(0x42),
        ]);
        assert_eq!(manifest.lookup(0x41), None);
        assert_eq!(manifest.lookup(0x42), Some(0));
    }

    #[test]
    fn test_commit_fails_while_locked_but_applies_in_memory() {
        let (_tmp, config, directory) = setup();
        let mut manifest = ManifestStore::new(directory.clone(), &config);
        let other = ManifestStore::new(directory, &config);
        let held = other.lock_exclusive().expect("lock");

        let result = manifest.commit(&[ManifestEntry::for_codepoint(0x30)]);
        assert!(result.is_err_and(|e| e.is_lock_timeout()));
        assert_eq!(manifest.lookup(0x30), Some(0));
        drop(held);
    }
}
