use std::fs;
use std::path::Path;

use tracing::warn;

use crate::mounts::{find_mountpoint, read_mountinfo};
use crate::{DownloadRequest, OsRelease, SessionError, UpgradeLayout};

/// Checks a new download request against the running system.
pub fn validate_request(
    request: &DownloadRequest,
    layout: &UpgradeLayout,
    system: &OsRelease,
) -> Result<(), SessionError> {
    validate_releasever(&request.releasever, system)?;
    let datadir = request.effective_datadir(layout);
    validate_datadir(&datadir, datadir == layout.default_datadir(), layout)
}

pub fn validate_releasever(releasever: &str, system: &OsRelease) -> Result<(), SessionError> {
    if releasever.eq_ignore_ascii_case("rawhide") {
        return Ok(());
    }

    let current: f64 = system
        .version_id
        .parse()
        .map_err(|_| SessionError::usage("can't determine system version"))?;
    let requested: f64 = releasever.parse().map_err(|_| {
        SessionError::usage(format!(
            "invalid version '{releasever}' (expected a number or \"rawhide\")"
        ))
    })?;
    if requested <= current {
        return Err(SessionError::usage(format!(
            "version must be higher than {}",
            system.version_id
        )));
    }
    Ok(())
}

fn validate_datadir(
    datadir: &Path,
    is_default: bool,
    layout: &UpgradeLayout,
) -> Result<(), SessionError> {
    let rejected = |reason: &str| SessionError::usage(format!("{} {reason}", datadir.display()));

    if !datadir.is_absolute() {
        return Err(rejected("is not an absolute path"));
    }

    match read_mountinfo(&layout.mountinfo_path()) {
        Ok(mounts) => {
            if let Some(mount) = find_mountpoint(&mounts, datadir) {
                if mount.is_network() {
                    return Err(rejected("is on a network filesystem"));
                }
                if mount.is_pseudo() {
                    return Err(rejected("is on a temporary filesystem"));
                }
            }
        }
        Err(err) => warn!(error = %format!("{err:#}"), "skipping filesystem check for datadir"),
    }

    if is_default {
        return Ok(());
    }
    if !datadir.exists() {
        return Err(rejected("does not exist"));
    }
    if !datadir.is_dir() {
        return Err(rejected("is not a directory"));
    }
    let mut entries = fs::read_dir(datadir)
        .map_err(|err| rejected(&format!("cannot be read: {err}")))?;
    if entries.next().is_some() {
        return Err(rejected("is not empty"));
    }
    Ok(())
}
