//! Per-font disk cache.

use sdfcache_formats::block_id_for;
use tracing::{debug, info, warn};

use crate::batcher::{FlushReport, WriteBatcher};
use crate::block_store::{CacheId, SharedBlockStore};
use crate::config::StorageConfig;
use crate::directory::CacheDirectory;
use crate::glyph::GlyphRecord;
use crate::manifest_store::ManifestStore;
use crate::Result;

/// Disk cache for one font at one render configuration.
///
/// Dropping the cache flushes staged glyphs, unmaps its blocks and
/// removes orphaned temporary files from its directory.
#[derive(Debug)]
pub struct DiskCache {
    store: SharedBlockStore,
    cache: CacheId,
    directory: CacheDirectory,
    manifest: ManifestStore,
    batcher: WriteBatcher,
}

impl DiskCache {
    /// Open the cache for `family`/`style` under the configured root.
    pub fn open(
        store: &SharedBlockStore,
        config: &StorageConfig,
        family: &str,
        style: &str,
    ) -> Result<Self> {
        let directory = CacheDirectory::for_font(&config.root, family, style, &config.key());
        Self::open_at(store, config, directory)
    }

    /// Open the cache stored in `directory`.
    ///
    /// A manifest that cannot be loaded (lock timeout, I/O error) leaves
    /// the cache empty rather than failing.
    pub fn open_at(
        store: &SharedBlockStore,
        config: &StorageConfig,
        directory: CacheDirectory,
    ) -> Result<Self> {
        config.validate()?;
        directory.create()?;

        let mut manifest = ManifestStore::new(directory.clone(), config);
        if let Err(e) = manifest.load() {
            warn!(
                "Starting with empty manifest for {}: {e}",
                directory.path().display()
            );
        }
        let cache = store.lock().register(directory.clone());
        info!(
            "Opened glyph cache {} ({} entries)",
            directory.path().display(),
            manifest.len()
        );

        Ok(Self {
            store: store.clone(),
            cache,
            directory,
            manifest,
            batcher: WriteBatcher::new(config.batch_size, config.lost_write_policy),
        })
    }

    /// Cache directory.
    pub const fn directory(&self) -> &CacheDirectory {
        &self.directory
    }

    /// Number of codepoints in the manifest.
    pub fn manifest_size(&self) -> usize {
        self.manifest.len()
    }

    /// Number of glyphs staged for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.batcher.pending_len()
    }

    /// Re-read the manifest from disk, picking up other processes' writes.
    pub fn reload_manifest(&mut self) -> Result<()> {
        self.manifest.load()
    }

    /// Look up a cached bitmap: staged glyphs first, then disk.
    ///
    /// Any failure along the way is a miss.
    pub fn try_load_glyph(&self, codepoint: u32) -> Option<GlyphRecord> {
        if let Some(staged) = self.batcher.find_pending(codepoint) {
            return Some(staged.clone());
        }
        let block = self.manifest.lookup(codepoint)?;
        debug_assert_eq!(block, block_id_for(codepoint));
        self.store.lock().lookup(self.cache, block, codepoint)
    }

    /// Stage a freshly generated glyph, flushing once the batch is full.
    pub fn store_glyph(&mut self, glyph: GlyphRecord) -> Option<FlushReport> {
        if self.batcher.stage(glyph) {
            Some(self.flush_pending_writes())
        } else {
            None
        }
    }

    /// Write all staged glyphs now.
    pub fn flush_pending_writes(&mut self) -> FlushReport {
        let mut store = self.store.lock();
        self.batcher.flush(&mut store, self.cache, &mut self.manifest)
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        if self.batcher.has_work() {
            let report = self.flush_pending_writes();
            if report.glyphs_retained > 0 || report.glyphs_dropped > 0 {
                warn!(
                    "Closing {} with {} unwritten glyphs",
                    self.directory.path().display(),
                    report.glyphs_retained + report.glyphs_dropped
                );
            }
        }
        self.store.lock().unregister(self.cache);
        self.directory.cleanup_orphans();
        debug!("Closed glyph cache {}", self.directory.path().display());
    }
}
