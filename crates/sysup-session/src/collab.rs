use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SessionError, UpgradeLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only move packages forward.
    Upgrade,
    /// Install the new release's builds even when they are older.
    DistroSync,
}

/// Arguments of a `download` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub releasever: String,
    pub datadir: Option<PathBuf>,
    pub distro_sync: bool,
    pub nogpgcheck: bool,
    pub add_install: Vec<String>,
}

impl DownloadRequest {
    pub fn sync_mode(&self) -> SyncMode {
        if self.distro_sync {
            SyncMode::DistroSync
        } else {
            SyncMode::Upgrade
        }
    }

    pub fn effective_datadir(&self, layout: &UpgradeLayout) -> PathBuf {
        self.datadir
            .clone()
            .unwrap_or_else(|| layout.default_datadir())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOptions<'a> {
    pub releasever: &'a str,
    pub datadir: &'a Path,
    pub nogpgcheck: bool,
    /// Use only cached metadata; set for the offline upgrade phase.
    pub cache_only: bool,
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("repository metadata unavailable: {0}")]
    RepoUnavailable(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("package manager helper failed: {0:#}")]
    Helper(anyhow::Error),
}

/// Resolution, download and transaction work delegated to the system package
/// manager. Every call blocks until the step completes.
pub trait PackageManager {
    /// Prepares repositories for `options` and returns the metadata cache dir.
    fn setup(&mut self, options: &SetupOptions<'_>) -> Result<PathBuf, CollaboratorError>;

    /// Loads repository metadata and returns the ids of enabled repos.
    fn refresh_metadata(&mut self) -> Result<Vec<String>, CollaboratorError>;

    fn resolve(
        &mut self,
        mode: SyncMode,
        add_install: &[String],
    ) -> Result<Vec<ResolvedPackage>, CollaboratorError>;

    fn download(
        &mut self,
        packages: &[ResolvedPackage],
        reporter: &dyn Reporter,
    ) -> Result<(), CollaboratorError>;

    /// Dry run of the offline install. Must not change the system.
    fn test_transaction(&mut self, reporter: &dyn Reporter) -> Result<(), CollaboratorError>;

    fn run_transaction(&mut self, reporter: &dyn Reporter) -> Result<(), CollaboratorError>;
}

/// User-facing output sink.
pub trait Reporter {
    fn message(&self, text: &str);
    fn progress(&self, label: &str, current: u64, total: u64);
}

pub trait BootPreparer {
    /// Arranges for the next boot to run the offline upgrade from `datadir`.
    fn prepare(&mut self, packages: &[PathBuf], datadir: &Path) -> anyhow::Result<()>;
    fn reboot(&mut self) -> anyhow::Result<()>;
}

/// Turns a stored command line back into the request it started.
pub trait CommandReplay {
    fn parse_download(&self, argv: &[String]) -> Result<DownloadRequest, SessionError>;
}

/// Set from a signal handler, polled between session steps.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), SessionError> {
        if self.is_raised() {
            return Err(SessionError::Interrupted);
        }
        Ok(())
    }
}
