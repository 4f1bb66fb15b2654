use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Section, StateKey, StoreError};

/// Raw section/key/value content of the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl StateDocument {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed parsing state document")
    }

    pub fn render(&self) -> Result<String> {
        toml::to_string(self).context("failed serializing state document")
    }

    pub fn get(&self, key: StateKey) -> Option<&str> {
        self.get_raw(key.section().as_str(), key.name())
    }

    pub fn get_raw(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|options| options.get(option))
            .map(String::as_str)
    }

    pub fn set(&mut self, key: StateKey, value: impl Into<String>) -> Result<(), StoreError> {
        let value = value.into();
        if value.is_empty() {
            return Err(StoreError::InvalidValue { key });
        }

        debug!("set {key}={value}");
        self.sections
            .entry(key.section().as_str().to_string())
            .or_default()
            .insert(key.name().to_string(), value);
        Ok(())
    }

    /// Removes `key`; returns whether anything was there.
    pub fn delete(&mut self, key: StateKey) -> bool {
        let section = key.section().as_str();
        let Some(options) = self.sections.get_mut(section) else {
            return false;
        };

        let removed = options.remove(key.name()).is_some();
        if options.is_empty() {
            self.sections.remove(section);
        }
        if removed {
            debug!("del {key}");
        }
        removed
    }

    /// Drops every section except the persist namespace.
    pub fn reset(&mut self) {
        let persist = Section::Persist.as_str();
        self.sections.retain(|name, _| name == persist);
        debug!("cleared all data");
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
