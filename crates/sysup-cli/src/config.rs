use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/sysup/sysup.toml";
pub(crate) const CONFIG_ENV: &str = "SYSUP_CONFIG";

/// Settings read from `sysup.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SysupConfig {
    /// Filesystem root every managed path is resolved against.
    pub(crate) root: PathBuf,
    pub(crate) log_file: PathBuf,
    /// Refuse state-changing commands unless running as uid 0.
    pub(crate) require_root: bool,
    pub(crate) helper: HelperConfig,
    pub(crate) reboot_command: Vec<String>,
}

impl Default for SysupConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            log_file: PathBuf::from("/var/log/sysup.log"),
            require_root: true,
            helper: HelperConfig::default(),
            reboot_command: vec!["systemctl".to_string(), "reboot".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct HelperConfig {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/libexec/sysup/package-helper"),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigSource {
    pub(crate) path: PathBuf,
    /// Named by the operator; a missing file is then an error.
    pub(crate) explicit: bool,
}

pub(crate) fn resolve_config_source(flag: Option<&Path>, env_value: Option<&str>) -> ConfigSource {
    if let Some(path) = flag {
        return ConfigSource {
            path: path.to_path_buf(),
            explicit: true,
        };
    }
    match env_value.filter(|value| !value.is_empty()) {
        Some(value) => ConfigSource {
            path: PathBuf::from(value),
            explicit: true,
        },
        None => ConfigSource {
            path: PathBuf::from(DEFAULT_CONFIG_PATH),
            explicit: false,
        },
    }
}

pub(crate) fn parse_config(content: &str) -> Result<SysupConfig> {
    let config: SysupConfig = toml::from_str(content).context("failed to parse config")?;
    anyhow::ensure!(
        config.root.is_absolute(),
        "root must be an absolute path: {}",
        config.root.display()
    );
    Ok(config)
}

pub(crate) fn load_config(source: &ConfigSource) -> Result<SysupConfig> {
    let content = match fs::read_to_string(&source.path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !source.explicit => {
            return Ok(SysupConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read config: {}", source.path.display())
            });
        }
    };
    parse_config(&content).with_context(|| format!("in {}", source.path.display()))
}
