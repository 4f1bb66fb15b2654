use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::{shell_join, shell_split, StateDocument, StateKey, StoreError};

/// Typed view of the session data held in the state file.
///
/// `upgrade_target` and `cmdline` are set exactly while an upgrade is in
/// progress; `upgrade_ready` implies `upgrade_target`. [`encode_onto`]
/// rejects records that break either rule.
///
/// [`encode_onto`]: SessionRecord::encode_onto
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub current_system: Option<String>,
    pub upgrade_target: Option<String>,
    pub upgrade_ready: bool,
    pub releasever: Option<String>,
    pub enabled_repos: BTreeSet<String>,
    pub pkgs_total: Option<u64>,
    pub size_total: Option<u64>,
    pub cmdline: Option<Vec<String>>,
    pub datadir: Option<PathBuf>,
    pub cachedir: Option<PathBuf>,
}

impl SessionRecord {
    pub fn decode(document: &StateDocument) -> Result<Self, StoreError> {
        let text = |key: StateKey| document.get(key).map(str::to_string);

        Ok(Self {
            current_system: text(StateKey::CurrentSystem),
            upgrade_target: text(StateKey::UpgradeTarget),
            upgrade_ready: decode_flag(document, StateKey::UpgradeReady)?,
            releasever: text(StateKey::Releasever),
            enabled_repos: document
                .get(StateKey::EnabledRepos)
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            pkgs_total: decode_number(document, StateKey::PkgsTotal)?,
            size_total: decode_number(document, StateKey::SizeTotal)?,
            cmdline: document
                .get(StateKey::Cmdline)
                .map(|raw| {
                    shell_split(raw).map_err(|err| StoreError::Decode {
                        key: StateKey::Cmdline,
                        reason: err.to_string(),
                    })
                })
                .transpose()?,
            datadir: document.get(StateKey::Datadir).map(PathBuf::from),
            cachedir: document.get(StateKey::Cachedir).map(PathBuf::from),
        })
    }

    /// Writes every known key onto a copy of `base`; keys this record does
    /// not know about are carried over untouched.
    pub fn encode_onto(&self, base: &StateDocument) -> Result<StateDocument, StoreError> {
        if self.upgrade_ready && self.upgrade_target.is_none() {
            return Err(StoreError::Inconsistent(
                "upgrade_ready is set without an upgrade target",
            ));
        }
        if self.upgrade_target.is_some() != self.cmdline.is_some() {
            return Err(StoreError::Inconsistent(
                "upgrade target and cmdline must be set together",
            ));
        }

        let mut document = base.clone();
        put(
            &mut document,
            StateKey::CurrentSystem,
            self.current_system.clone(),
        )?;
        put(
            &mut document,
            StateKey::UpgradeTarget,
            self.upgrade_target.clone(),
        )?;
        put(
            &mut document,
            StateKey::UpgradeReady,
            self.upgrade_ready.then(|| "1".to_string()),
        )?;
        put(&mut document, StateKey::Releasever, self.releasever.clone())?;
        put(
            &mut document,
            StateKey::EnabledRepos,
            (!self.enabled_repos.is_empty()).then(|| {
                self.enabled_repos
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
        )?;
        put(
            &mut document,
            StateKey::PkgsTotal,
            self.pkgs_total.map(|total| total.to_string()),
        )?;
        put(
            &mut document,
            StateKey::SizeTotal,
            self.size_total.map(|total| total.to_string()),
        )?;
        put(
            &mut document,
            StateKey::Cmdline,
            self.cmdline.as_deref().map(shell_join),
        )?;
        put(
            &mut document,
            StateKey::Datadir,
            self.datadir.as_deref().map(path_value),
        )?;
        put(
            &mut document,
            StateKey::Cachedir,
            self.cachedir.as_deref().map(path_value),
        )?;
        Ok(document)
    }

    pub fn in_progress(&self) -> bool {
        self.upgrade_target.is_some()
    }
}

fn put(document: &mut StateDocument, key: StateKey, value: Option<String>) -> Result<(), StoreError> {
    match value {
        Some(value) => document.set(key, value),
        None => {
            document.delete(key);
            Ok(())
        }
    }
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn decode_flag(document: &StateDocument, key: StateKey) -> Result<bool, StoreError> {
    match document.get(key) {
        None => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(other) => Err(StoreError::Decode {
            key,
            reason: format!("expected a boolean flag, found '{other}'"),
        }),
    }
}

fn decode_number(document: &StateDocument, key: StateKey) -> Result<Option<u64>, StoreError> {
    document
        .get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|err| StoreError::Decode {
                key,
                reason: format!("'{raw}' is not a byte/package count: {err}"),
            })
        })
        .transpose()
}
