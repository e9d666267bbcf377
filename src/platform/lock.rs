//! Cross-process action lock
//!
//! The mode controller serializes actions within one process. Script mode and
//! the CLI are separate processes, so they additionally take an exclusive
//! `flock` on a shared lock file for the duration of an action.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to lock {path}: {errno}")]
    Lock { path: PathBuf, errno: Errno },
}

/// Held until dropped; the kernel releases the lock with the descriptor.
#[derive(Debug)]
pub struct ActionLock {
    _lock: Flock<File>,
}

impl ActionLock {
    /// Block until the lock file is exclusively ours
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| LockError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Waiting for action lock {}", path.display());
        let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            LockError::Lock {
                path: path.to_path_buf(),
                errno,
            }
        })?;
        debug!("Acquired action lock {}", path.display());

        Ok(Self { _lock: lock })
    }
}

/// Whether the current process runs with root privileges
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("nm-killswitch.lock");

        let _lock = ActionLock::acquire(&path).unwrap();

        assert!(path.is_file());
    }

    #[test]
    fn test_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nm-killswitch.lock");

        drop(ActionLock::acquire(&path).unwrap());
        assert!(ActionLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_held_lock_excludes_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nm-killswitch.lock");
        let _held = ActionLock::acquire(&path).unwrap();

        let other = OpenOptions::new().write(true).open(&path).unwrap();
        let result = Flock::lock(other, FlockArg::LockExclusiveNonblock);

        assert!(matches!(result, Err((_, errno)) if errno == Errno::EWOULDBLOCK));
    }
}
