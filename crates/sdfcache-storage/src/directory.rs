//! Cache directory naming and file layout.
//!
//! One directory per (family, style, render size, spread):
//!
//! ```text
//! <root>/<family>_<style>_s<size>_sp<spread>/
//!     manifest.dat    snapshot
//!     manifest.jrn    journal
//!     manifest.lock
//!     block_<id>.dat
//!     block_<id>.lock
//!     pregen.lock     present while pregeneration runs
//! ```

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sdfcache_formats::CacheKey;
use tracing::debug;

use crate::lock::{FileLock, LockMode};
use crate::Result;

const MANIFEST_FILE: &str = "manifest.dat";
const JOURNAL_FILE: &str = "manifest.jrn";
const MANIFEST_LOCK_FILE: &str = "manifest.lock";
const PREGEN_LOCK_FILE: &str = "pregen.lock";

/// Characters that are not allowed in directory names on common filesystems.
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Make a font family or style name safe to use as a path component.
///
/// Reserved and control characters become `_`, trailing spaces and dots
/// are trimmed and an empty result becomes `unnamed`.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Paths of one font cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheDirectory {
    path: PathBuf,
}

impl CacheDirectory {
    /// Directory for `family`/`style` rendered with `key` under `root`.
    pub fn for_font(root: &Path, family: &str, style: &str, key: &CacheKey) -> Self {
        let name = format!(
            "{}_{}_s{}_sp{}",
            sanitize_component(family),
            sanitize_component(style),
            key.render_size,
            key.spread
        );
        Self {
            path: root.join(name),
        }
    }

    /// Use `path` as the cache directory directly.
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Create the directory if missing.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Manifest snapshot.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Temporary snapshot written before the atomic rename.
    pub fn manifest_tmp_path(&self) -> PathBuf {
        self.manifest_path().with_extension("tmp")
    }

    /// Manifest journal.
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Manifest lock file.
    pub fn manifest_lock_path(&self) -> PathBuf {
        self.path.join(MANIFEST_LOCK_FILE)
    }

    /// Live block file.
    pub fn block_path(&self, block_id: u32) -> PathBuf {
        self.path.join(format!("block_{block_id}.dat"))
    }

    /// Temporary block file written before the atomic rename.
    pub fn block_tmp_path(&self, block_id: u32) -> PathBuf {
        self.block_path(block_id).with_extension("tmp")
    }

    /// Fallback location used when the rename over the live file fails.
    pub fn block_old_path(&self, block_id: u32) -> PathBuf {
        self.block_path(block_id).with_extension("old")
    }

    /// Block lock file.
    pub fn block_lock_path(&self, block_id: u32) -> PathBuf {
        self.path.join(format!("block_{block_id}.lock"))
    }

    /// Pregeneration marker.
    pub fn pregen_lock_path(&self) -> PathBuf {
        self.path.join(PREGEN_LOCK_FILE)
    }

    /// Lock guarding a `.tmp` or `.old` file, if it is one this cache writes.
    fn orphan_guard(&self, path: &Path) -> Option<PathBuf> {
        let ext = path.extension()?;
        if ext != "tmp" && ext != "old" {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem == "manifest" && ext == "tmp" {
            return Some(self.manifest_lock_path());
        }
        let block_id = stem.strip_prefix("block_")?.parse::<u32>().ok()?;
        Some(self.block_lock_path(block_id))
    }

    /// Remove leftover `.tmp` and `.old` files; returns how many went.
    ///
    /// Each file is only removed while its block or manifest lock can be
    /// taken without waiting, so files a live writer is about to rename
    /// are left alone.
    pub fn cleanup_orphans(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.path) else {
            return 0;
        };
        let mut removed = 0;
        let mut busy = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(guard) = self.orphan_guard(&path) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let Ok(Some(_lock)) = FileLock::try_acquire(&guard, LockMode::Exclusive) else {
                busy += 1;
                continue;
            };
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 || busy > 0 {
            debug!(
                "Removed {} orphaned files from {} ({} in use)",
                removed,
                self.path.display(),
                busy
            );
        }
        removed
    }
}

/// Write `data` to `path` and flush it to stable storage.
pub(crate) fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use sdfcache_formats::PixelFormat;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Noto Sans"), "Noto Sans");
        assert_eq!(sanitize_component("A/B:C*D?"), "A_B_C_D_");
        assert_eq!(sanitize_component("Bold\u{7}"), "Bold_");
        assert_eq!(sanitize_component("Italic. . "), "Italic");
        assert_eq!(sanitize_component(" ..."), "unnamed");
        assert_eq!(sanitize_component(""), "unnamed");
    }

    #[test]
    fn test_directory_naming() {
        let key = CacheKey::new(64, 8, PixelFormat::Rgba8);
        let dir = CacheDirectory::for_font(Path::new("/cache"), "Friz Quadrata", "Regular", &key);
        assert_eq!(dir.path(), Path::new("/cache/Friz Quadrata_Regular_s64_sp8"));
        assert_eq!(
            dir.block_path(3),
            Path::new("/cache/Friz Quadrata_Regular_s64_sp8/block_3.dat")
        );
        assert_eq!(
            dir.block_tmp_path(3),
            Path::new("/cache/Friz Quadrata_Regular_s64_sp8/block_3.tmp")
        );
        assert_eq!(
            dir.block_old_path(3),
            Path::new("/cache/Friz Quadrata_Regular_s64_sp8/block_3.old")
        );
        assert_eq!(
            dir.manifest_tmp_path(),
            Path::new("/cache/Friz Quadrata_Regular_s64_sp8/manifest.tmp")
        );
    }

    #[test]
    fn test_cleanup_orphans() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = CacheDirectory::at(tmp.path());
        std::fs::write(dir.block_tmp_path(1), b"x").expect("write");
        std::fs::write(dir.block_old_path(2), b"x").expect("write");
        std::fs::write(dir.manifest_tmp_path(), b"x").expect("write");
        std::fs::write(dir.block_path(1), b"keep").expect("write");

        assert_eq!(dir.cleanup_orphans(), 3);
        assert!(dir.block_path(1).exists());
        assert_eq!(dir.cleanup_orphans(), 0);
    }

    #[test]
    fn test_cleanup_skips_locked_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = CacheDirectory::at(tmp.path());
        std::fs::write(dir.block_tmp_path(4), b"x").expect("write");
        std::fs::write(dir.block_old_path(5), b"x").expect("write");
        std::fs::write(dir.manifest_tmp_path(), b"x").expect("write");
        std::fs::write(tmp.path().join("notes.tmp"), b"x").expect("write");

        let block = FileLock::try_acquire(&dir.block_lock_path(4), LockMode::Exclusive)
            .expect("io")
            .expect("free");
        let manifest = FileLock::try_acquire(&dir.manifest_lock_path(), LockMode::Shared)
            .expect("io")
            .expect("free");

        assert_eq!(dir.cleanup_orphans(), 1);
        assert!(dir.block_tmp_path(4).exists());
        assert!(!dir.block_old_path(5).exists());
        assert!(dir.manifest_tmp_path().exists());
        assert!(tmp.path().join("notes.tmp").exists());

        drop(block);
        drop(manifest);
        assert_eq!(dir.cleanup_orphans(), 2);
    }
}
