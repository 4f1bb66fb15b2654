mod error;
mod exclusion;
mod file_lock;
mod memory;
mod pid_lock;

pub use error::LockError;
pub use exclusion::{with_exclusive, ExclusionLock, HeldLock, OsExclusionLock};
pub use file_lock::{Access, FileLock, LockMode, LockWait};
pub use memory::{MemoryExclusionLock, MemoryLockTable};
pub use pid_lock::{read_holder_pid, PidLock};

#[cfg(test)]
mod tests;
