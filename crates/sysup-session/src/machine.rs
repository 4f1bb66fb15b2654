use std::fmt;

use sysup_store::SessionRecord;

use crate::{CleanScope, DownloadRequest, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    DownloadInProgress,
    ReadyForUpgrade,
    /// Only ever held in memory while the offline phase runs.
    Upgrading,
}

impl SessionState {
    pub fn of(record: &SessionRecord) -> Self {
        match (&record.upgrade_target, record.upgrade_ready) {
            (None, _) => Self::Idle,
            (Some(_), false) => Self::DownloadInProgress,
            (Some(_), true) => Self::ReadyForUpgrade,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DownloadInProgress => "download in progress",
            Self::ReadyForUpgrade => "ready for upgrade",
            Self::Upgrading => "upgrading",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Status,
    Download,
    Resume,
    Cancel,
    Reboot,
    Clean,
    SystemUpgrade,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Download => "download",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Reboot => "reboot",
            Self::Clean => "clean",
            Self::SystemUpgrade => "system-upgrade",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator request, before it is checked against the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Status,
    /// `argv` is the invocation as typed; it is what gets stored and later
    /// compared to detect a repeated command.
    Download {
        request: DownloadRequest,
        argv: Vec<String>,
    },
    Resume,
    Cancel {
        keep_data: bool,
    },
    Reboot,
    Clean(CleanScope),
    SystemUpgrade {
        testing: bool,
        reboot: bool,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Status => ActionKind::Status,
            Self::Download { .. } => ActionKind::Download,
            Self::Resume => ActionKind::Resume,
            Self::Cancel { .. } => ActionKind::Cancel,
            Self::Reboot => ActionKind::Reboot,
            Self::Clean(_) => ActionKind::Clean,
            Self::SystemUpgrade { .. } => ActionKind::SystemUpgrade,
        }
    }
}

/// What an accepted action will actually do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Status,
    NewDownload {
        request: DownloadRequest,
        argv: Vec<String>,
    },
    /// Replays the stored command line.
    ResumeDownload,
    Cancel {
        keep_data: bool,
    },
    Reboot,
    Clean(CleanScope),
    SystemUpgrade {
        testing: bool,
        reboot: bool,
    },
}

/// Decides whether `action` is legal for the session in `record`.
pub fn plan(record: &SessionRecord, action: Action) -> Result<Plan, SessionError> {
    let state = SessionState::of(record);
    let kind = action.kind();
    let conflict = |reason: &str| SessionError::StateConflict {
        state,
        action: kind,
        reason: reason.to_string(),
    };

    match action {
        Action::Status => Ok(Plan::Status),
        Action::Download { request, argv } => match &record.cmdline {
            None => Ok(Plan::NewDownload { request, argv }),
            Some(stored) if *stored == argv => Ok(Plan::ResumeDownload),
            Some(_) => Err(conflict("interrupted upgrade detected")),
        },
        Action::Resume => match state {
            SessionState::DownloadInProgress | SessionState::ReadyForUpgrade => {
                Ok(Plan::ResumeDownload)
            }
            _ => Err(conflict("no upgrade to resume")),
        },
        Action::Cancel { keep_data } => match state {
            SessionState::DownloadInProgress | SessionState::ReadyForUpgrade => {
                Ok(Plan::Cancel { keep_data })
            }
            _ => Err(conflict("no upgrade to cancel")),
        },
        Action::Reboot => ready_only(state, &conflict).map(|()| Plan::Reboot),
        Action::Clean(scope) => Ok(Plan::Clean(scope)),
        Action::SystemUpgrade { testing, reboot } => ready_only(state, &conflict)
            .map(|()| Plan::SystemUpgrade { testing, reboot }),
    }
}

fn ready_only(
    state: SessionState,
    conflict: &dyn Fn(&str) -> SessionError,
) -> Result<(), SessionError> {
    match state {
        SessionState::ReadyForUpgrade => Ok(()),
        SessionState::DownloadInProgress => Err(conflict("download incomplete")),
        SessionState::Idle | SessionState::Upgrading => {
            Err(conflict("no operation in progress"))
        }
    }
}
