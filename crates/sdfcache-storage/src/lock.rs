//! Advisory file locks shared between cooperating processes.
//!
//! [`FileLock`] wraps `flock` (unix) or the standard library's file locks
//! (elsewhere) in a polling loop with an explicit timeout. Locks are held
//! per open file, so two handles in the same process exclude each other
//! just like two processes do.
//!
//! [`MarkerLock`] is a create-new marker file used for process-exclusive
//! work such as pregeneration. It never waits and removes itself on drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{Result, StorageError};

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers
    Shared,
    /// One writer
    Exclusive,
}

/// An acquired advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Acquire `path` in `mode`, polling every `poll` until `timeout`.
    ///
    /// The lock file is created if missing and is never deleted.
    pub fn acquire(path: &Path, mode: LockMode, timeout: Duration, poll: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;

        let start = Instant::now();
        loop {
            if try_lock(&file, mode)? {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }
            let waited = start.elapsed();
            if waited >= timeout {
                warn!("Lock timeout after {:?}: {}", waited, path.display());
                return Err(StorageError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            std::thread::sleep(poll.min(timeout.saturating_sub(waited)));
        }
    }

    /// Take `path` in `mode` only if it is free right now.
    ///
    /// `Ok(None)` means another holder has it. Never waits or logs.
    pub fn try_acquire(path: &Path, mode: LockMode) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        if try_lock(&file, mode)? {
            Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                mode,
            }))
        } else {
            Ok(None)
        }
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the lock is held in.
    pub const fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn try_lock(file: &File, mode: LockMode) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    if unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err.into())
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above; closing the descriptor would release it anyway.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock(file: &File, mode: LockMode) -> Result<bool> {
    let result = match mode {
        LockMode::Shared => file.try_lock_shared(),
        LockMode::Exclusive => file.try_lock(),
    };
    match result {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(e)) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) {
    let _ = file.unlock();
}

/// Process-exclusive marker file.
///
/// Created with `create_new`, so only one holder can exist per path at a
/// time. The file is removed when the marker is dropped.
#[derive(Debug)]
pub struct MarkerLock {
    _file: File,
    path: PathBuf,
}

impl MarkerLock {
    /// Try to create the marker; `Ok(None)` if someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => {
                debug!("Acquired marker {}", path.display());
                Ok(Some(Self {
                    _file: file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Marker file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MarkerLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
