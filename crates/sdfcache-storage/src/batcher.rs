//! Groups staged glyphs into per-block writes.

use std::collections::{BTreeMap, HashMap};

use sdfcache_formats::{block_id_for, ManifestEntry};
use tracing::{debug, warn};

use crate::block_store::{BlockStore, CacheId};
use crate::config::LostWritePolicy;
use crate::glyph::GlyphRecord;
use crate::manifest_store::ManifestStore;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Block files rewritten
    pub blocks_written: usize,
    /// Glyphs persisted
    pub glyphs_written: usize,
    /// Glyphs kept staged after a lock timeout
    pub glyphs_retained: usize,
    /// Glyphs discarded
    pub glyphs_dropped: usize,
    /// Manifest entries committed to the journal
    pub entries_committed: usize,
    /// Manifest entries waiting for a later commit
    pub entries_pending: usize,
}

impl FlushReport {
    /// Whether the flush had nothing to do.
    pub const fn is_empty(&self) -> bool {
        self.blocks_written == 0
            && self.glyphs_retained == 0
            && self.glyphs_dropped == 0
            && self.entries_committed == 0
            && self.entries_pending == 0
    }

    /// Fold in a later flush: work counts add up, backlog counts are
    /// replaced by the later report's.
    pub fn merge(&mut self, other: &Self) {
        self.blocks_written += other.blocks_written;
        self.glyphs_written += other.glyphs_written;
        self.glyphs_retained = other.glyphs_retained;
        self.glyphs_dropped += other.glyphs_dropped;
        self.entries_committed += other.entries_committed;
        self.entries_pending = other.entries_pending;
    }
}

/// FIFO of glyphs waiting to be written.
#[derive(Debug)]
pub struct WriteBatcher {
    pending: Vec<GlyphRecord>,
    batch_size: usize,
    policy: LostWritePolicy,
    /// Lock timeouts seen per block since its last successful write
    attempts: HashMap<u32, u32>,
    /// Written entries whose journal append has not happened yet
    uncommitted: Vec<ManifestEntry>,
}

impl WriteBatcher {
    /// Create a batcher that asks for a flush every `batch_size` glyphs.
    pub fn new(batch_size: usize, policy: LostWritePolicy) -> Self {
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            policy,
            attempts: HashMap::new(),
            uncommitted: Vec::new(),
        }
    }

    /// Stage a glyph; returns `true` once the batch threshold is reached.
    pub fn stage(&mut self, glyph: GlyphRecord) -> bool {
        self.pending.push(glyph);
        self.pending.len() >= self.batch_size
    }

    /// Number of staged glyphs.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a flush has anything left to do.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.uncommitted.is_empty()
    }

    /// Most recently staged copy of `codepoint`.
    pub fn find_pending(&self, codepoint: u32) -> Option<&GlyphRecord> {
        self.pending.iter().rev().find(|g| g.codepoint == codepoint)
    }

    /// Write every staged glyph and commit the resulting manifest entries.
    ///
    /// Each block is written under its own lock. Blocks whose lock timed
    /// out are retained or dropped per the lost-write policy; other write
    /// failures drop the block's glyphs. Manifest entries are committed
    /// under a single manifest lock and kept for the next flush if that
    /// lock is unavailable.
    pub fn flush(
        &mut self,
        store: &mut BlockStore,
        cache: CacheId,
        manifest: &mut ManifestStore,
    ) -> FlushReport {
        let mut report = FlushReport::default();

        let mut groups: BTreeMap<u32, Vec<GlyphRecord>> = BTreeMap::new();
        for glyph in self.pending.drain(..) {
            groups
                .entry(block_id_for(glyph.codepoint))
                .or_default()
                .push(glyph);
        }

        for (block, glyphs) in groups {
            match store.write(cache, block, &glyphs) {
                Ok(entries) => {
                    self.attempts.remove(&block);
                    report.blocks_written += 1;
                    report.glyphs_written += entries.len();
                    self.uncommitted.extend(entries);
                }
                Err(e) if e.is_lock_timeout() => {
                    if self.should_retain(block) {
                        report.glyphs_retained += glyphs.len();
                        self.pending.extend(glyphs);
                    } else {
                        warn!("Dropping {} glyphs for block {block}: {e}", glyphs.len());
                        self.attempts.remove(&block);
                        report.glyphs_dropped += glyphs.len();
                    }
                }
                Err(e) => {
                    warn!("Dropping {} glyphs for block {block}: {e}", glyphs.len());
                    report.glyphs_dropped += glyphs.len();
                }
            }
        }

        if !self.uncommitted.is_empty() {
            match manifest.commit(&self.uncommitted) {
                Ok(()) => {
                    report.entries_committed = self.uncommitted.len();
                    self.uncommitted.clear();
                }
                Err(e) => {
                    warn!(
                        "Deferring {} manifest entries: {e}",
                        self.uncommitted.len()
                    );
                    report.entries_pending = self.uncommitted.len();
                }
            }
        }

        if !report.is_empty() {
            debug!("Flush: {report:?}");
        }
        report
    }

    fn should_retain(&mut self, block: u32) -> bool {
        match self.policy {
            LostWritePolicy::Drop => false,
            LostWritePolicy::Retain => true,
            LostWritePolicy::RetainAttempts(limit) => {
                let seen = self.attempts.entry(block).or_insert(0);
                *seen += 1;
                *seen <= limit
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::directory::CacheDirectory;
    use crate::lock::{FileLock, LockMode};
    use sdfcache_formats::PixelFormat;
    use std::time::Duration;

    struct Fixture {
        _tmp: tempfile::TempDir,
        directory: CacheDirectory,
        store: BlockStore,
        cache: CacheId,
        manifest: ManifestStore,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::new(tmp.path())
            .with_render(8, 2, PixelFormat::Rgba8)
            .with_block_lock_timeout(Duration::from_millis(30));
        let directory = CacheDirectory::at(tmp.path().join("font"));
        directory.create().expect("mkdir");
        let mut store = BlockStore::new(&config).expect("store");
        let cache = store.register(directory.clone());
        let manifest = ManifestStore::new(directory.clone(), &config);
        Fixture {
            _tmp: tmp,
            directory,
            store,
            cache,
            manifest,
        }
    }

    fn glyph(codepoint: u32) -> GlyphRecord {
        GlyphRecord::new(codepoint, 1, 1, 0, 0, vec![codepoint as u8; 4])
    }

    #[test]
    fn test_stage_reports_threshold() {
        let mut batcher = WriteBatcher::new(3, LostWritePolicy::Retain);
        assert!(!batcher.stage(glyph(1)));
        assert!(!batcher.stage(glyph(2)));
        assert!(batcher.stage(glyph(3)));
        assert_eq!(batcher.pending_len(), 3);
        assert_eq!(batcher.find_pending(2), Some(&glyph(2)));
    }

    #[test]
    fn test_report_merge() {
        let mut total = FlushReport {
            blocks_written: 2,
            glyphs_written: 5,
            glyphs_retained: 3,
            ..FlushReport::default()
        };
        total.merge(&FlushReport {
            blocks_written: 1,
            glyphs_written: 4,
            entries_committed: 4,
            ..FlushReport::default()
        });
        assert_eq!(total.blocks_written, 3);
        assert_eq!(total.glyphs_written, 9);
        assert_eq!(total.glyphs_retained, 0);
        assert_eq!(total.entries_committed, 4);
    }

    #[test]
    fn test_flush_groups_by_block() {
        let mut f = fixture();
        let mut batcher = WriteBatcher::new(128, LostWritePolicy::Retain);
        for cp in [0x41, 0x300, 0x4E00, 0x42] {
            batcher.stage(glyph(cp));
        }
        let report = batcher.flush(&mut f.store, f.cache, &mut f.manifest);
        assert_eq!(report.blocks_written, 3);
        assert_eq!(report.glyphs_written, 4);
        assert_eq!(report.entries_committed, 4);
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(f.manifest.lookup(0x4E00), Some(0x4E00 / 512));
        assert!(f.store.lookup(f.cache, 1, 0x300).is_some());
    }

    #[test]
    fn test_lock_timeout_policies() {
        for (policy, retained_after_two) in [
            (LostWritePolicy::Drop, 0),
            (LostWritePolicy::Retain, 1),
            (LostWritePolicy::RetainAttempts(1), 0),
        ] {
            let mut f = fixture();
            let held = FileLock::acquire(
                &f.directory.block_lock_path(0),
                LockMode::Exclusive,
                Duration::from_millis(10),
                Duration::from_millis(1),
            )
            .expect("hold");

            let mut batcher = WriteBatcher::new(128, policy);
            batcher.stage(glyph(0x41));
            batcher.flush(&mut f.store, f.cache, &mut f.manifest);
            let second = batcher.flush(&mut f.store, f.cache, &mut f.manifest);
            assert_eq!(batcher.pending_len(), retained_after_two, "{policy:?}");
            assert_eq!(second.glyphs_written, 0);

            drop(held);
            let last = batcher.flush(&mut f.store, f.cache, &mut f.manifest);
            assert_eq!(last.glyphs_written, retained_after_two, "{policy:?}");
        }
    }

    #[test]
    fn test_manifest_lock_timeout_defers_entries() {
        let mut f = fixture();
        let held = f.manifest.lock_exclusive().expect("hold");

        let mut batcher = WriteBatcher::new(128, LostWritePolicy::Retain);
        batcher.stage(glyph(0x61));
        let report = batcher.flush(&mut f.store, f.cache, &mut f.manifest);
        assert_eq!(report.glyphs_written, 1);
        assert_eq!(report.entries_pending, 1);
        drop(held);

        let report = batcher.flush(&mut f.store, f.cache, &mut f.manifest);
        assert_eq!(report.entries_committed, 1);
        assert!(f.directory.manifest_path().exists());
    }
}
