//! Offline pregeneration of a font's disk cache.
//!
//! A pool of worker threads pulls codepoints from a shared counter, each
//! with its own rasterizer, and stages results into one shared
//! [`DiskCache`]. Only one pregeneration may run per cache root at a time;
//! the `pregen.lock` marker keeps cooperating processes out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sdfcache_formats::CacheKey;
use sdfcache_storage::{
    CacheDirectory, DiskCache, FlushReport, GlyphRecord, MarkerLock, SharedBlockStore,
    StorageConfig,
};
use tracing::{debug, info, warn};

use crate::config::PregenConfig;
use crate::glyph_cache::fits_key;
use crate::throttle::Throttle;
use crate::traits::Rasterizer;
use crate::{AtlasError, Result};

/// Inclusive codepoint range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PregenRange {
    start: u32,
    end: u32,
}

impl PregenRange {
    /// `start..=end`; rejects reversed ranges and the full `u32` space.
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if end < start || (start == 0 && end == u32::MAX) {
            return Err(AtlasError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Default range for a client locale code such as `zhCN` or `ruRU`.
    pub fn for_locale(locale: &str) -> Self {
        let end = match locale {
            "zhCN" | "zhTW" => 0x9FFF,
            "koKR" => 0xD7AF,
            "ruRU" => 0x04FF,
            _ => 0x00FF,
        };
        Self { start: 0x20, end }
    }

    /// First codepoint.
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Last codepoint.
    pub const fn end(&self) -> u32 {
        self.end
    }

    /// Number of codepoints.
    pub const fn len(&self) -> u64 {
        self.end as u64 - self.start as u64 + 1
    }

    /// Always false; ranges hold at least one codepoint.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `codepoint` lies in the range.
    pub const fn contains(&self, codepoint: u32) -> bool {
        codepoint >= self.start && codepoint <= self.end
    }
}

/// Live counters, readable from another thread while a run is going.
#[derive(Debug, Default)]
pub struct PregenProgress {
    total: AtomicU64,
    done: AtomicU64,
    rasterized: AtomicU64,
    failed: AtomicU64,
}

impl PregenProgress {
    fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Release);
        self.done.store(0, Ordering::Release);
        self.rasterized.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
    }

    /// Codepoints in the current run.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Codepoints processed so far.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Codepoints that produced a glyph.
    pub fn rasterized(&self) -> u64 {
        self.rasterized.load(Ordering::Relaxed)
    }

    /// Codepoints the rasterizer could not handle.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Completed share in `0.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.done() as f64 / total as f64
    }
}

/// Outcome of a pregeneration run.
#[derive(Debug, Clone, PartialEq)]
pub struct PregenReport {
    /// Range that was processed
    pub range: PregenRange,
    /// Worker threads used
    pub workers: usize,
    /// Codepoints that produced a glyph (including empty ones)
    pub rasterized: u64,
    /// Codepoints without a usable glyph
    pub failed: u64,
    /// Whether a worker could not start and the run stopped early
    pub aborted: bool,
    /// All flushes performed during the run, including the final one
    pub flush: FlushReport,
    /// Manifest size once the run finished
    pub manifest_entries: usize,
    /// Wall time
    pub elapsed: Duration,
}

/// State shared by the workers of one run.
struct Shared<'a> {
    next: AtomicU64,
    end: u64,
    abort: AtomicBool,
    key: CacheKey,
    cpu_limit: f64,
    cache: Mutex<DiskCache>,
    flushes: Mutex<FlushReport>,
    progress: &'a PregenProgress,
}

impl Shared<'_> {
    fn work<R: Rasterizer>(&self, worker: usize, mut rasterizer: R) {
        let mut throttle = Throttle::new(self.cpu_limit);
        let mut produced = 0u64;

        while !self.abort.load(Ordering::Acquire) {
            let next = self.next.fetch_add(1, Ordering::AcqRel);
            if next > self.end {
                break;
            }
            let Ok(codepoint) = u32::try_from(next) else {
                break;
            };

            throttle.start_work();
            let glyph = rasterizer.rasterize(codepoint).filter(|g| {
                fits_key(&self.key, g.width, g.height, g.pixels.len())
            });
            throttle.end_work();

            if let Some(glyph) = glyph {
                let record = GlyphRecord::new(
                    codepoint,
                    glyph.width,
                    glyph.height,
                    glyph.bitmap_top,
                    glyph.bitmap_left,
                    glyph.pixels,
                );
                let flushed = self.cache.lock().store_glyph(record);
                if let Some(report) = flushed {
                    self.flushes.lock().merge(&report);
                }
                self.progress.rasterized.fetch_add(1, Ordering::Relaxed);
                produced += 1;
            } else {
                self.progress.failed.fetch_add(1, Ordering::Relaxed);
            }
            self.progress.done.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Pregeneration worker {} finished ({} glyphs)", worker, produced);
    }
}

/// Runs pregeneration against a block store.
#[derive(Debug)]
pub struct Pregenerator<'a> {
    store: &'a SharedBlockStore,
    config: &'a StorageConfig,
    options: PregenConfig,
    progress: Arc<PregenProgress>,
}

impl<'a> Pregenerator<'a> {
    /// Pregenerate into caches under `config.root`.
    pub fn new(store: &'a SharedBlockStore, config: &'a StorageConfig) -> Self {
        Self {
            store,
            config,
            options: PregenConfig::default(),
            progress: Arc::default(),
        }
    }

    /// Set worker count and CPU ceiling.
    #[must_use]
    pub const fn with_options(mut self, options: PregenConfig) -> Self {
        self.options = options;
        self
    }

    /// Counters of the current or last run.
    pub fn progress(&self) -> Arc<PregenProgress> {
        Arc::clone(&self.progress)
    }

    /// Rasterize `range` for `family`/`style` and persist the results.
    ///
    /// `factory` is called once per worker with the worker index and must
    /// return that worker's rasterizer; `None` aborts the run. Codepoints
    /// the rasterizer rejects are skipped and never stored.
    pub fn run<R, F>(&self, family: &str, style: &str, range: PregenRange, factory: F) -> Result<PregenReport>
    where
        R: Rasterizer,
        F: Fn(usize) -> Option<R> + Sync,
    {
        let root = CacheDirectory::at(&self.config.root);
        root.create()?;
        let marker_path = root.pregen_lock_path();
        let Some(_marker) = MarkerLock::try_acquire(&marker_path)? else {
            warn!("Pregeneration marker {} is held", marker_path.display());
            return Err(AtlasError::PregenRunning(marker_path));
        };

        let started = Instant::now();
        let workers = self.options.effective_workers();
        let cache = DiskCache::open(self.store, self.config, family, style)?;
        info!(
            "Pregenerating {} {}: U+{:04X}..=U+{:04X} ({} codepoints, {} workers, {} cached)",
            family,
            style,
            range.start,
            range.end,
            range.len(),
            workers,
            cache.manifest_size()
        );

        self.progress.reset(range.len());
        let shared = Shared {
            next: AtomicU64::new(u64::from(range.start)),
            end: u64::from(range.end),
            abort: AtomicBool::new(false),
            key: self.config.key(),
            cpu_limit: self.options.cpu_limit_percent,
            cache: Mutex::new(cache),
            flushes: Mutex::new(FlushReport::default()),
            progress: &self.progress,
        };

        thread::scope(|scope| {
            for worker in 0..workers {
                let shared = &shared;
                let factory = &factory;
                scope.spawn(move || match factory(worker) {
                    Some(rasterizer) => shared.work(worker, rasterizer),
                    None => {
                        warn!("Pregeneration worker {} has no rasterizer, aborting", worker);
                        shared.abort.store(true, Ordering::Release);
                    }
                });
            }
        });

        let Shared {
            abort,
            cache,
            flushes,
            ..
        } = shared;
        let mut cache = cache.into_inner();
        let mut flush = flushes.into_inner();
        flush.merge(&cache.flush_pending_writes());

        let report = PregenReport {
            range,
            workers,
            rasterized: self.progress.rasterized(),
            failed: self.progress.failed(),
            aborted: abort.into_inner(),
            flush,
            manifest_entries: cache.manifest_size(),
            elapsed: started.elapsed(),
        };
        info!(
            "Pregenerated {} {}: {} glyphs, {} skipped, {} manifest entries in {:?}",
            family,
            style,
            report.rasterized,
            report.failed,
            report.manifest_entries,
            report.elapsed
        );
        Ok(report)
    }
}
