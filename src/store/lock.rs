//! Exclusive ownership of a storage root.
//!
//! The cache and image tables live in memory and are written back whole, so
//! two processes mutating one root would overwrite each other's rows. The
//! process that opens a root holds an advisory lock on `<root>/.lock` until
//! it drops the store; any other open fails with [`StorageError::Locked`].

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::StorageError;

/// Lock file name under the storage root.
pub const LOCK_FILE: &str = ".lock";

/// Held for as long as a process owns the root. Released on drop.
#[derive(Debug)]
pub struct RootLock {
    path: PathBuf,
    _file: File,
}

impl RootLock {
    /// Take the lock on `root` without waiting.
    pub fn acquire(root: &Path) -> Result<Self, StorageError> {
        let path = root.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(StorageError::Locked {
                    path: root.display().to_string(),
                });
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        }

        // Owner pid, informational only
        if file.set_len(0).is_ok() {
            let _ = writeln!(file, "{}", std::process::id());
        }

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
