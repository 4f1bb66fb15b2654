use std::fs;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{SessionRecord, StateDocument, StateKey, StoreError};

/// Durable, section/key state file with commit-on-success scopes.
///
/// Mutations only touch the in-memory document. Nothing reaches the disk
/// until a [`StoreTransaction`] is committed (or [`StateStore::transact`] /
/// [`StateStore::update`] finish cleanly), and each commit replaces the whole
/// file in one atomic rename.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    document: StateDocument,
}

impl StateStore {
    /// Opens the store at `path`. A missing, unreadable or unparsable file
    /// yields an empty document.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = read_document(&path);
        Self { path, document }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    /// Discards in-memory changes and re-reads the last committed snapshot.
    pub fn reload(&mut self) {
        self.document = read_document(&self.path);
    }

    pub fn get(&self, key: StateKey) -> Option<&str> {
        self.document.get(key)
    }

    pub fn set(&mut self, key: StateKey, value: impl Into<String>) -> Result<(), StoreError> {
        self.document.set(key, value)
    }

    pub fn delete(&mut self, key: StateKey) {
        self.document.delete(key);
    }

    pub fn reset(&mut self) {
        self.document.reset();
    }

    pub fn record(&self) -> Result<SessionRecord, StoreError> {
        SessionRecord::decode(&self.document)
    }

    /// Replaces the in-memory content with `record`. Either every key is
    /// written or, on a validation error, nothing is.
    pub fn write_record(&mut self, record: &SessionRecord) -> Result<(), StoreError> {
        self.document = record.encode_onto(&self.document)?;
        Ok(())
    }

    pub fn transaction(&mut self) -> StoreTransaction<'_> {
        StoreTransaction { store: self }
    }

    /// Runs `body` and flushes the whole document if it returns `Ok`.
    /// On `Err` the file on disk is left exactly as it was.
    pub fn transact<T, E>(
        &mut self,
        body: impl FnOnce(&mut StateStore) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut tx = self.transaction();
        let value = body(&mut *tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Decodes the record, lets `mutate` change it and commits the result.
    pub fn update<T, E>(
        &mut self,
        mutate: impl FnOnce(&mut SessionRecord) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.transact(|store| {
            let mut record = store.record()?;
            let value = mutate(&mut record)?;
            store.write_record(&record)?;
            Ok(value)
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        write_document_atomically(&self.path, &self.document).map_err(StoreError::Persist)
    }
}

/// An open commit scope. Dropping it without [`commit`](Self::commit) keeps
/// the in-memory changes but never writes them.
#[derive(Debug)]
pub struct StoreTransaction<'a> {
    store: &'a mut StateStore,
}

impl StoreTransaction<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.store.flush()
    }

    pub fn discard(self) {
        debug!(path = %self.store.path.display(), "discarded state changes");
    }
}

impl Deref for StoreTransaction<'_> {
    type Target = StateStore;

    fn deref(&self) -> &StateStore {
        self.store
    }
}

impl DerefMut for StoreTransaction<'_> {
    fn deref_mut(&mut self) -> &mut StateStore {
        self.store
    }
}

fn read_document(path: &Path) -> StateDocument {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return StateDocument::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read state file; starting empty");
            return StateDocument::default();
        }
    };

    match StateDocument::parse(&raw) {
        Ok(document) => document,
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "ignoring unparsable state file");
            StateDocument::default()
        }
    }
}

fn write_document_atomically(path: &Path, document: &StateDocument) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_private_dir(parent)
        .with_context(|| format!("failed to create state directory: {}", parent.display()))?;

    let rendered = document.render()?;
    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage state file in {}", parent.display()))?;
    staged
        .write_all(rendered.as_bytes())
        .with_context(|| format!("failed to write staged state file for {}", path.display()))?;
    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("failed to sync staged state file for {}", path.display()))?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace state file: {}", path.display()))?;

    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    debug!(path = %path.display(), "flushed state file");
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}
