use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{Access, FileLock, LockError, LockMode, LockWait};

const ACQUIRE_ATTEMPTS: usize = 5;
const HOLDER_PID_POLLS: usize = 25;
const HOLDER_PID_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Single-instance guard: an exclusive lock on a pid file that also records
/// the holder's pid for diagnostics.
///
/// A pid file left behind by a dead process never blocks a new acquisition,
/// only a live lock does. The handle is close-on-exec, so child processes do
/// not keep the lock alive.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
    lock: Option<FileLock>,
}

impl PidLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let pid = std::process::id();
        for _ in 0..ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| LockError::Io {
                    path: path.clone(),
                    source,
                })?;

            let mut lock = match FileLock::lock(
                file,
                &path,
                Access::ReadWrite,
                LockMode::Exclusive,
                LockWait::NonBlock,
            ) {
                Ok(lock) => lock,
                Err(LockError::LockBusy { .. }) => {
                    return Err(LockError::AlreadyRunning {
                        pid: wait_for_holder_pid(&path),
                    });
                }
                Err(err) => return Err(err),
            };

            // A releasing holder unlinks the file before unlocking, so the
            // inode we locked may no longer be the one at `path`.
            if !still_linked(&lock, &path) {
                debug!(path = %path.display(), "pid file replaced while locking; retrying");
                continue;
            }

            write_pid(&mut lock, pid).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), pid, "acquired pid lock");
            return Ok(Self {
                path,
                pid,
                lock: Some(lock),
            });
        }

        Err(LockError::AlreadyRunning {
            pid: wait_for_holder_pid(&path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Removes the pid file, then drops the lock.
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };

        let removed = match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        };
        let unlocked = lock.unlock();
        debug!(path = %self.path.display(), "released pid lock");
        removed.and(unlocked)
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!(error = %err, "failed to release pid lock");
        }
    }
}

/// Reads the pid recorded in a pid file. Missing, empty or garbled files
/// yield `None`.
pub fn read_holder_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// The winner writes its pid right after locking; give it a short window
/// before reporting the holder as unknown.
fn wait_for_holder_pid(path: &Path) -> Option<u32> {
    for _ in 0..HOLDER_PID_POLLS {
        if let Some(pid) = read_holder_pid(path) {
            return Some(pid);
        }
        thread::sleep(HOLDER_PID_POLL_INTERVAL);
    }
    read_holder_pid(path)
}

fn write_pid(lock: &mut FileLock, pid: u32) -> io::Result<()> {
    let file = lock.file_mut();
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(format!("{pid}\n").as_bytes())?;
    file.sync_data()
}

#[cfg(unix)]
fn still_linked(lock: &FileLock, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let (Ok(held), Ok(on_disk)) = (lock.file().metadata(), fs::metadata(path)) else {
        return false;
    };
    held.dev() == on_disk.dev() && held.ino() == on_disk.ino()
}

#[cfg(not(unix))]
fn still_linked(_lock: &FileLock, path: &Path) -> bool {
    path.exists()
}
