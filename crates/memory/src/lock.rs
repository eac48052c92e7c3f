//! Advisory lock on a storage directory.
//!
//! One live store per directory. The lock is an OS file lock on `LOCK`, so it
//! disappears with the process and never outlives a crash.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use turnstore_core::{AppError, AppResult};

/// Lock file name inside the storage directory.
pub const LOCK_FILE_NAME: &str = "LOCK";

/// Exclusive advisory lock, released on `release` or drop.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Take the lock or fail with `AppError::Locked` if another store holds it.
    pub fn acquire(directory: &Path) -> AppResult<Self> {
        let path = directory.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(AppError::Locked(directory.to_path_buf()));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        // Holder's pid, for operators only
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!("Acquired directory lock {:?}", path);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    pub fn release(self) -> AppResult<()> {
        self.file.unlock()?;
        tracing::debug!("Released directory lock {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_rejected() {
        let temp = TempDir::new().unwrap();
        let first = DirectoryLock::acquire(temp.path()).unwrap();

        let second = DirectoryLock::acquire(temp.path());
        assert!(matches!(second, Err(AppError::Locked(_))));

        first.release().unwrap();
        DirectoryLock::acquire(temp.path()).unwrap();
    }

    #[test]
    fn test_drop_releases_lock() {
        let temp = TempDir::new().unwrap();
        {
            let lock = DirectoryLock::acquire(temp.path()).unwrap();
            assert!(lock.path().ends_with(LOCK_FILE_NAME));
        }
        DirectoryLock::acquire(temp.path()).unwrap();
    }
}
