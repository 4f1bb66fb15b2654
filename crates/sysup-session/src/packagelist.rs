use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

pub const PACKAGE_LIST_NAME: &str = "package.list";

pub fn package_list_path(datadir: &Path) -> PathBuf {
    datadir.join(PACKAGE_LIST_NAME)
}

/// Records `packages` in the datadir's list, one path per line relative to
/// `datadir`.
pub fn write_package_list(datadir: &Path, packages: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(datadir)
        .with_context(|| format!("failed to create {}", datadir.display()))?;

    let mut raw = String::new();
    for package in packages {
        let relative = package.strip_prefix(datadir).unwrap_or(package);
        raw.push_str(&relative.to_string_lossy());
        raw.push('\n');
    }

    let path = package_list_path(datadir);
    fs::write(&path, raw)
        .with_context(|| format!("failed to write package list: {}", path.display()))
}

/// Absolute paths of the listed packages. A missing list is empty.
pub fn read_package_list(datadir: &Path) -> Result<Vec<PathBuf>> {
    let path = package_list_path(datadir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read package list: {}", path.display()));
        }
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| datadir.join(line))
        .collect())
}

/// Deletes regular files in `datadir` that are neither listed nor the list
/// itself. Returns what was removed.
pub fn prune_datadir(datadir: &Path) -> Result<Vec<PathBuf>> {
    let mut keep: HashSet<PathBuf> = read_package_list(datadir)?.into_iter().collect();
    keep.insert(package_list_path(datadir));

    let entries = match fs::read_dir(datadir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", datadir.display()));
        }
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", datadir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if !file_type.is_file() || keep.contains(&path) {
            continue;
        }
        info!(path = %path.display(), "removing unlisted file from datadir");
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}

/// Bytes of listed packages already present, or `None` without a list.
pub fn local_size(datadir: &Path) -> Option<u64> {
    let packages = read_package_list(datadir).ok()?;
    if packages.is_empty() {
        return None;
    }
    Some(
        packages
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum(),
    )
}
