use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::cleanup::{remove_path, RemovalOutcome};
use crate::mounts::{find_mountpoint, mount_unit_name, read_mountinfo, render_mount_unit};
use crate::{BootPreparer, UpgradeLayout};

/// Prepares a systemd offline update: mount units for every filesystem
/// holding packages, plus the `system-update` marker pointing at the datadir.
#[derive(Debug, Clone)]
pub struct SystemdBootPreparer {
    layout: UpgradeLayout,
    reboot_command: Vec<String>,
}

impl SystemdBootPreparer {
    pub fn new(layout: UpgradeLayout, reboot_command: Vec<String>) -> Self {
        Self {
            layout,
            reboot_command,
        }
    }

    /// Writes one `.mount` unit per filesystem holding a package directory
    /// and returns the unit paths.
    pub fn write_mount_units(&self, packages: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mounts = read_mountinfo(&self.layout.mountinfo_path())?;

        let mut needed = BTreeMap::new();
        for package in packages {
            let Some(dir) = package.parent() else {
                continue;
            };
            if let Some(mount) = find_mountpoint(&mounts, dir) {
                needed.insert(mount.mount_point.clone(), mount);
            }
        }

        let unit_dir = self.layout.mount_unit_dir();
        fs::create_dir_all(&unit_dir)
            .with_context(|| format!("failed to create {}", unit_dir.display()))?;

        let mut written = Vec::with_capacity(needed.len());
        for mount in needed.into_values() {
            let path = unit_dir.join(mount_unit_name(mount));
            fs::write(&path, render_mount_unit(mount))
                .with_context(|| format!("failed to write mount unit: {}", path.display()))?;
            debug!(path = %path.display(), "wrote mount unit");
            written.push(path);
        }
        Ok(written)
    }

    pub fn link_reboot_marker(&self, datadir: &Path) -> Result<PathBuf> {
        let marker = self.layout.reboot_marker_path();
        if let RemovalOutcome::Failed(reason) = remove_path(&marker, "stale reboot marker").outcome
        {
            bail!("failed to replace {}: {reason}", marker.display());
        }
        symlink(datadir, &marker).with_context(|| {
            format!(
                "failed to create reboot marker {} -> {}",
                marker.display(),
                datadir.display()
            )
        })?;
        Ok(marker)
    }
}

impl BootPreparer for SystemdBootPreparer {
    fn prepare(&mut self, packages: &[PathBuf], datadir: &Path) -> Result<()> {
        self.write_mount_units(packages)?;
        self.link_reboot_marker(datadir)?;
        Ok(())
    }

    fn reboot(&mut self) -> Result<()> {
        let Some((program, args)) = self.reboot_command.split_first() else {
            bail!("no reboot command configured");
        };
        info!(command = ?self.reboot_command, "initiating reboot");
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run reboot command: {program}"))?;
        if !output.status.success() {
            bail!(
                "reboot command failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "offline upgrades need symlink support",
    ))
}
