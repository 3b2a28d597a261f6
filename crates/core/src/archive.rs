//! Read-only access to zip-like mod archives.
//!
//! Handles are opened per call and dropped before returning.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::model::{
    is_lang_file_name, sort_and_dedupe_case_insensitive, ASSETS_DIR_NAME, LANG_DIR_NAME,
};
use crate::storage::{StorageError, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry path with `/` separators and no trailing separator. Used for matching.
    pub name: String,
    /// Name exactly as stored in the archive. Used for lookups.
    pub raw_name: String,
    pub is_dir: bool,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            raw_name: name.clone(),
            name,
            is_dir: false,
        }
    }

    fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn parent(&self) -> Option<&str> {
        self.name.rsplit_once('/').map(|(parent, _)| parent)
    }
}

/// Lists every entry of the archive at `path`.
pub fn list_entries(path: &Path) -> StorageResult<Vec<ArchiveEntry>> {
    let mut archive = open(path)?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|err| StorageError::archive(path, err))?;
        let raw_name = entry.name().to_string();
        let normalized = raw_name.replace('\\', "/");
        let is_dir = entry.is_dir() || normalized.ends_with('/');
        let name = normalized.trim_end_matches('/').to_string();
        if name.is_empty() {
            continue;
        }
        entries.push(ArchiveEntry {
            name,
            raw_name,
            is_dir,
        });
    }
    Ok(entries)
}

/// Reads the full contents of one entry, looked up by its stored name.
pub fn read_entry(path: &Path, entry_name: &str) -> StorageResult<Vec<u8>> {
    let mut archive = open(path)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(StorageError::MissingEntry {
                archive: path.to_path_buf(),
                entry: entry_name.to_string(),
            })
        }
        Err(err) => return Err(StorageError::archive(path, err)),
    };
    let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut bytes).map_err(|err| StorageError::Io {
        action: "read archive entry",
        path: path.to_path_buf(),
        source: err,
    })?;
    Ok(bytes)
}

fn open(path: &Path) -> StorageResult<ZipArchive<fs::File>> {
    let file = fs::File::open(path).map_err(|err| StorageError::Io {
        action: "open archive",
        path: path.to_path_buf(),
        source: err,
    })?;
    ZipArchive::new(file).map_err(|err| StorageError::archive(path, err))
}

/// True when any entry lives under a top-level `assets/` folder.
pub fn has_assets_root(entries: &[ArchiveEntry]) -> bool {
    let prefix = format!("{ASSETS_DIR_NAME}/");
    entries
        .iter()
        .any(|entry| entry.name.to_ascii_lowercase().starts_with(&prefix))
}

/// Prefixes of every `.../lang` folder that directly holds a localization file.
pub fn lang_candidates(entries: &[ArchiveEntry]) -> Vec<String> {
    let candidates = entries
        .iter()
        .filter(|entry| !entry.is_dir && is_lang_file_name(entry.file_name()))
        .filter_map(|entry| entry.parent())
        .filter(|parent| {
            parent
                .rsplit('/')
                .next()
                .is_some_and(|segment| segment.eq_ignore_ascii_case(LANG_DIR_NAME))
        })
        .map(str::to_string)
        .collect::<Vec<_>>();
    sort_and_dedupe_case_insensitive(candidates)
}

/// Localization files sitting exactly one segment below `prefix`.
pub fn direct_lang_files<'a>(entries: &'a [ArchiveEntry], prefix: &str) -> Vec<&'a ArchiveEntry> {
    let prefix = prefix.trim_end_matches('/');
    entries
        .iter()
        .filter(|entry| !entry.is_dir && is_lang_file_name(entry.file_name()))
        .filter(|entry| {
            entry
                .parent()
                .is_some_and(|parent| parent.eq_ignore_ascii_case(prefix))
        })
        .collect()
}
