use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::LockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read lock; conflicts only with exclusive holders.
    Shared,
    /// Write lock; conflicts with everyone.
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Block,
    NonBlock,
}

/// How the underlying file handle was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// An OS advisory lock held on an open file.
///
/// The lock lives as long as the handle: dropping the value (or the process
/// dying) releases it without touching the file on disk.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    pub fn open(
        path: &Path,
        access: Access,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<Self, LockError> {
        let opened = match access {
            Access::ReadOnly => OpenOptions::new().read(true).open(path),
            Access::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path),
        };
        let file = opened.map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::lock(file, path, access, mode, wait)
    }

    /// Locks an already-open `file`. `access` must describe how it was
    /// opened: exclusive locks need a writable handle.
    pub fn lock(
        file: File,
        path: impl Into<PathBuf>,
        access: Access,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<Self, LockError> {
        let path = path.into();
        if mode == LockMode::Exclusive && access == Access::ReadOnly {
            return Err(LockError::ReadOnly { path });
        }

        let locked = match (mode, wait) {
            (LockMode::Shared, LockWait::Block) => FileExt::lock_shared(&file),
            (LockMode::Shared, LockWait::NonBlock) => FileExt::try_lock_shared(&file),
            (LockMode::Exclusive, LockWait::Block) => FileExt::lock_exclusive(&file),
            (LockMode::Exclusive, LockWait::NonBlock) => FileExt::try_lock_exclusive(&file),
        };

        match locked {
            Ok(()) => Ok(Self { file, path, mode }),
            Err(err) if is_contended(&err) => Err(LockError::LockBusy { path }),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn unlock(self) -> Result<(), LockError> {
        FileExt::unlock(&self.file).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
