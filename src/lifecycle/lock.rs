//! Lifecycle lock
//!
//! Serialises peer creation, deletion and fixing reconciliation, both
//! between tasks in this process and between processes (the scheduler and
//! interactive CLI invocations) through an exclusive `flock` on a file in
//! the data directory.

use crate::error::{Result, VpnmonError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// An exclusive advisory lock on an open file, released on drop
#[derive(Debug)]
struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the lock on `path` is held
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            loop {
                let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
                if rc == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

/// Lock shared by every operation that mutates the peer set
#[derive(Debug)]
pub struct LifecycleLock {
    local: Mutex<()>,
    path: Option<PathBuf>,
}

/// Proof that the lifecycle lock is held
#[derive(Debug)]
pub struct LifecycleGuard<'a> {
    _file: Option<FileLock>,
    _local: MutexGuard<'a, ()>,
}

impl LifecycleLock {
    /// A lock coordinated through the file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            local: Mutex::new(()),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// A lock that only coordinates tasks within this process
    pub fn in_process() -> Self {
        Self {
            local: Mutex::new(()),
            path: None,
        }
    }

    /// Wait for exclusive access
    pub async fn acquire(&self) -> Result<LifecycleGuard<'_>> {
        let local = self.local.lock().await;

        let file = match &self.path {
            Some(path) => {
                let path = path.clone();
                let lock = tokio::task::spawn_blocking(move || FileLock::acquire(&path))
                    .await
                    .map_err(|e| VpnmonError::Io(std::io::Error::other(e)))?
                    .map_err(|e| {
                        VpnmonError::Io(std::io::Error::new(
                            e.kind(),
                            format!("Failed to lock {:?}: {}", self.path, e),
                        ))
                    })?;
                Some(lock)
            }
            None => None,
        };

        debug!("Lifecycle lock acquired");
        Ok(LifecycleGuard {
            _file: file,
            _local: local,
        })
    }
}
