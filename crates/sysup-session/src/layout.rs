use std::path::PathBuf;

/// Well-known paths of an upgrade session, all hanging off one filesystem
/// root so tests can run against a scratch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeLayout {
    root: PathBuf,
}

impl UpgradeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("var").join("lib").join("system-upgrade")
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join("upgrade.state")
    }

    pub fn default_datadir(&self) -> PathBuf {
        self.state_dir().join("packages")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("run").join("sysup.pid")
    }

    pub fn reboot_marker_path(&self) -> PathBuf {
        self.root.join("system-update")
    }

    pub fn mount_unit_dir(&self) -> PathBuf {
        self.root
            .join("etc")
            .join("systemd")
            .join("system")
            .join("sysup-system-upgrade.service.wants")
    }

    pub fn os_release_path(&self) -> PathBuf {
        self.root.join("etc").join("os-release")
    }

    pub fn mountinfo_path(&self) -> PathBuf {
        self.root.join("proc").join("self").join("mountinfo")
    }
}
