//! Run-level lock so scheduled runs never overlap.
//!
//! An advisory exclusive lock on a lock file. The OS drops the lock when the
//! holding process exits, so a crashed run never blocks the next one and a
//! long run is never taken over.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::PipelineError;

/// Held for the lifetime of a run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Take the lock without waiting. Fails with `LockHeld` when another run
    /// holds it.
    pub fn acquire(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = e.kind() == ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            if contended {
                return Err(PipelineError::LockHeld(path.to_path_buf()));
            }
            return Err(e.into());
        }

        // Holder pid, for operators only.
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired run lock at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}
