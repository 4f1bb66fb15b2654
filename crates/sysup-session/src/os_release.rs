use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sysup_store::shell_split;

/// The fields of `os-release` that identify the running system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub name: Option<String>,
}

impl OsRelease {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut id = None;
        let mut version_id = None;
        let mut name = None;

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            // Values use shell quoting.
            let value = shell_split(value)
                .map(|words| words.join(" "))
                .map_err(|err| anyhow!("invalid value for {key}: {err}"))?;
            match key {
                "ID" => id = Some(value),
                "VERSION_ID" => version_id = Some(value),
                "NAME" => name = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            id: id.unwrap_or_else(|| "linux".to_string()),
            version_id: version_id.ok_or_else(|| anyhow!("VERSION_ID is not set"))?,
            name,
        })
    }

    /// `"<id> <version>"`, the form stored as the current system.
    pub fn system(&self) -> String {
        format!("{} {}", self.id, self.version_id)
    }

    pub fn target(&self, releasever: &str) -> String {
        format!("{} {}", self.id, releasever)
    }
}
