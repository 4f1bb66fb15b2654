use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{ExclusionLock, HeldLock, LockError};

/// In-memory stand-in for the OS lock table, shared between simulated
/// processes. `crash` marks a pid dead: its record stays behind like a stale
/// pid file but no longer blocks anyone.
#[derive(Debug, Default, Clone)]
pub struct MemoryLockTable {
    inner: Arc<Mutex<TableState>>,
}

#[derive(Debug, Default)]
struct TableState {
    holders: HashMap<PathBuf, u32>,
    dead: HashSet<u32>,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lock source acting on behalf of process `pid`.
    pub fn process(&self, pid: u32) -> MemoryExclusionLock {
        MemoryExclusionLock {
            table: self.clone(),
            pid,
        }
    }

    pub fn crash(&self, pid: u32) {
        self.state().dead.insert(pid);
    }

    /// The pid recorded for `path`, live or stale.
    pub fn recorded_pid(&self, path: &Path) -> Option<u32> {
        self.state().holders.get(path).copied()
    }

    pub fn is_held(&self, path: &Path) -> bool {
        let state = self.state();
        state
            .holders
            .get(path)
            .is_some_and(|pid| !state.dead.contains(pid))
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_owner(&self, path: &Path, pid: u32) {
        let mut state = self.state();
        if state.holders.get(path) == Some(&pid) {
            state.holders.remove(path);
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryExclusionLock {
    table: MemoryLockTable,
    pid: u32,
}

impl ExclusionLock for MemoryExclusionLock {
    fn acquire(&self, path: &Path) -> Result<Box<dyn HeldLock>, LockError> {
        let mut state = self.table.state();
        if let Some(&holder) = state.holders.get(path) {
            if !state.dead.contains(&holder) {
                return Err(LockError::AlreadyRunning { pid: Some(holder) });
            }
        }
        state.holders.insert(path.to_path_buf(), self.pid);
        drop(state);

        Ok(Box::new(MemoryHeldLock {
            table: self.table.clone(),
            path: path.to_path_buf(),
            pid: self.pid,
            released: false,
        }))
    }
}

#[derive(Debug)]
struct MemoryHeldLock {
    table: MemoryLockTable,
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl MemoryHeldLock {
    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.table.remove_if_owner(&self.path, self.pid);
        }
    }
}

impl HeldLock for MemoryHeldLock {
    fn holder_pid(&self) -> u32 {
        self.pid
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn release(mut self: Box<Self>) -> Result<(), LockError> {
        self.release_inner();
        Ok(())
    }
}

impl Drop for MemoryHeldLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}
