use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sysup_store::{StateStore, StoreError};
use tracing::{info, warn};

use crate::UpgradeLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanScope {
    /// Downloaded packages; forgets `upgrade_ready` and `datadir`.
    Packages,
    /// Cached repository metadata; forgets `cachedir`.
    Metadata,
    /// Reboot marker and generated mount units.
    Misc,
    /// Packages and misc. Metadata is shared with the system package manager
    /// and is left alone.
    All,
}

impl CleanScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Metadata => "metadata",
            Self::Misc => "misc",
            Self::All => "all",
        }
    }
}

impl fmt::Display for CleanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "packages" => Ok(Self::Packages),
            "metadata" => Ok(Self::Metadata),
            "misc" => Ok(Self::Misc),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown clean scope '{other}' (expected packages, metadata, misc or all)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed,
    AlreadyRemoved,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub path: PathBuf,
    pub outcome: RemovalOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removals: Vec<Removal>,
}

impl CleanupReport {
    pub fn outcome_for(&self, path: &Path) -> Option<&RemovalOutcome> {
        self.removals
            .iter()
            .find(|removal| removal.path == path)
            .map(|removal| &removal.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Removal> {
        self.removals
            .iter()
            .filter(|removal| matches!(removal.outcome, RemovalOutcome::Failed(_)))
    }

    /// One operator-facing line per removal that failed.
    pub fn warnings(&self) -> Vec<String> {
        self.removals
            .iter()
            .filter_map(|removal| match &removal.outcome {
                RemovalOutcome::Failed(reason) => Some(format!(
                    "Warning: could not remove {}: {reason}",
                    removal.path.display()
                )),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, removal: Removal) {
        self.removals.push(removal);
    }
}

/// Removes a file, symlink or directory tree. Something already gone counts
/// as success; other failures are logged and returned, never raised.
pub fn remove_path(path: &Path, description: &str) -> Removal {
    let outcome = match fs::symlink_metadata(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "{description} already removed");
            RemovalOutcome::AlreadyRemoved
        }
        Err(err) => failed(path, description, &err),
        Ok(metadata) => {
            info!(path = %path.display(), "removing {description}");
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) => RemovalOutcome::Removed,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    RemovalOutcome::AlreadyRemoved
                }
                Err(err) => failed(path, description, &err),
            }
        }
    };

    Removal {
        path: path.to_path_buf(),
        outcome,
    }
}

fn failed(path: &Path, description: &str, err: &io::Error) -> RemovalOutcome {
    warn!(path = %path.display(), error = %err, "failed to remove {description}");
    RemovalOutcome::Failed(err.to_string())
}

/// Removes session artifacts and forgets them in the store. Must run under
/// the session lock.
#[derive(Debug, Clone, Copy)]
pub struct Cleaner<'a> {
    layout: &'a UpgradeLayout,
}

impl<'a> Cleaner<'a> {
    pub fn new(layout: &'a UpgradeLayout) -> Self {
        Self { layout }
    }

    pub fn clean(
        &self,
        store: &mut StateStore,
        scope: CleanScope,
    ) -> Result<CleanupReport, StoreError> {
        let mut report = CleanupReport::default();
        match scope {
            CleanScope::Packages => self.clean_packages(store, &mut report)?,
            CleanScope::Metadata => self.clean_metadata(store, &mut report)?,
            CleanScope::Misc => self.clean_misc(&mut report),
            CleanScope::All => {
                self.clean_packages(store, &mut report)?;
                self.clean_misc(&mut report);
            }
        }
        Ok(report)
    }

    fn clean_packages(
        &self,
        store: &mut StateStore,
        report: &mut CleanupReport,
    ) -> Result<(), StoreError> {
        if let Some(datadir) = store.record()?.datadir {
            report.record(remove_path(&datadir, "datadir"));
        }
        store.update(|record| {
            record.upgrade_ready = false;
            record.datadir = None;
            Ok::<_, StoreError>(())
        })
    }

    fn clean_metadata(
        &self,
        store: &mut StateStore,
        report: &mut CleanupReport,
    ) -> Result<(), StoreError> {
        if let Some(cachedir) = store.record()?.cachedir {
            report.record(remove_path(&cachedir, "cachedir"));
        }
        store.update(|record| {
            record.cachedir = None;
            Ok::<_, StoreError>(())
        })
    }

    fn clean_misc(&self, report: &mut CleanupReport) {
        report.record(remove_path(&self.layout.reboot_marker_path(), "reboot marker"));
        report.record(remove_path(&self.layout.mount_unit_dir(), "mount units"));
    }
}
