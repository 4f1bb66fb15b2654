use sysup_lock::LockError;
use sysup_store::StoreError;
use thiserror::Error;

use crate::{ActionKind, CollaboratorError, SessionState};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Usage(String),

    #[error("{reason}")]
    StateConflict {
        state: SessionState,
        action: ActionKind,
        reason: String,
    },

    #[error("already running as PID {}", describe_pid(.pid))]
    AlreadyRunning { pid: Option<u32> },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("exiting on keyboard interrupt")]
    Interrupted,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0:#}")]
    Fatal(#[from] anyhow::Error),
}

impl SessionError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_)
            | Self::StateConflict { .. }
            | Self::AlreadyRunning { .. }
            | Self::Collaborator(_) => 2,
            Self::Interrupted | Self::Store(_) | Self::Fatal(_) => 1,
        }
    }
}

impl From<LockError> for SessionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyRunning { pid } => Self::AlreadyRunning { pid },
            other => Self::Fatal(anyhow::Error::new(other)),
        }
    }
}

fn describe_pid(pid: &Option<u32>) -> String {
    pid.map(|pid| pid.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}
