use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("already running as PID {}", describe_pid(.pid))]
    AlreadyRunning { pid: Option<u32> },

    #[error("lock is busy: {}", .path.display())]
    LockBusy { path: PathBuf },

    #[error("cannot take an exclusive lock through a read-only handle: {}", .path.display())]
    ReadOnly { path: PathBuf },

    #[error("lock file error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe_pid(pid: &Option<u32>) -> String {
    pid.map(|pid| pid.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}
