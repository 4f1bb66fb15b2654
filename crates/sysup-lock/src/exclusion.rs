use std::fmt;
use std::path::Path;

use tracing::warn;

use crate::{LockError, PidLock};

/// A held single-instance lock, released explicitly or on drop.
pub trait HeldLock: fmt::Debug {
    fn holder_pid(&self) -> u32;
    fn path(&self) -> &Path;
    fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Source of single-instance locks. Production uses [`OsExclusionLock`];
/// tests can swap in [`crate::MemoryLockTable`] to simulate other processes.
pub trait ExclusionLock {
    fn acquire(&self, path: &Path) -> Result<Box<dyn HeldLock>, LockError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsExclusionLock;

impl ExclusionLock for OsExclusionLock {
    fn acquire(&self, path: &Path) -> Result<Box<dyn HeldLock>, LockError> {
        Ok(Box::new(PidLock::acquire(path)?))
    }
}

impl HeldLock for PidLock {
    fn holder_pid(&self) -> u32 {
        self.pid()
    }

    fn path(&self) -> &Path {
        PidLock::path(self)
    }

    fn release(self: Box<Self>) -> Result<(), LockError> {
        PidLock::release(*self)
    }
}

/// Runs `body` while holding the lock at `path`. The lock is released on
/// every exit path, including early error returns and unwinding.
pub fn with_exclusive<T, E>(
    locks: &dyn ExclusionLock,
    path: &Path,
    body: impl FnOnce(&dyn HeldLock) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<LockError>,
{
    let held = locks.acquire(path)?;
    let result = body(held.as_ref());
    if let Err(err) = held.release() {
        warn!(path = %path.display(), error = %err, "failed to release lock");
    }
    result
}
