use std::fmt;

/// Named group of keys in the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    System,
    Upgrade,
    Download,
    /// Keys that survive a reset so a later `clean` can still find them.
    Persist,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Upgrade => "upgrade",
            Self::Download => "download",
            Self::Persist => "persist",
        }
    }

    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Persist)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    CurrentSystem,
    UpgradeTarget,
    UpgradeReady,
    Releasever,
    EnabledRepos,
    PkgsTotal,
    SizeTotal,
    Cmdline,
    Datadir,
    Cachedir,
}

impl StateKey {
    pub const ALL: [StateKey; 10] = [
        Self::CurrentSystem,
        Self::UpgradeTarget,
        Self::UpgradeReady,
        Self::Releasever,
        Self::EnabledRepos,
        Self::PkgsTotal,
        Self::SizeTotal,
        Self::Cmdline,
        Self::Datadir,
        Self::Cachedir,
    ];

    pub fn section(self) -> Section {
        match self {
            Self::CurrentSystem => Section::System,
            Self::UpgradeTarget | Self::UpgradeReady | Self::Releasever | Self::EnabledRepos => {
                Section::Upgrade
            }
            Self::PkgsTotal | Self::SizeTotal | Self::Cmdline => Section::Download,
            Self::Datadir | Self::Cachedir => Section::Persist,
        }
    }

    /// Option name inside the key's section.
    pub fn name(self) -> &'static str {
        match self {
            Self::CurrentSystem => "distro",
            Self::UpgradeTarget => "target",
            Self::UpgradeReady => "ready",
            Self::Releasever => "releasever",
            Self::EnabledRepos => "enabled_repos",
            Self::PkgsTotal => "pkgs_total",
            Self::SizeTotal => "size_total",
            Self::Cmdline => "cmdline",
            Self::Datadir => "datadir",
            Self::Cachedir => "cachedir",
        }
    }

    pub fn is_persistent(self) -> bool {
        self.section().is_persistent()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section().as_str(), self.name())
    }
}
