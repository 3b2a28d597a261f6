use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the top-level resource folder inside a mod unit.
pub const ASSETS_DIR_NAME: &str = "assets";
/// Name of a localization folder, and of the canonical destination under each unit.
pub const LANG_DIR_NAME: &str = "lang";
/// File extensions that mark a directory as holding localization resources.
pub const LANG_FILE_EXTENSIONS: &[&str] = &["json", "lang"];
/// Extension of archive mod units picked up when archive units are included.
pub const ARCHIVE_UNIT_EXTENSION: &str = "jar";
/// Extension of backup archives written before execution.
pub const BACKUP_ARCHIVE_EXTENSION: &str = "zip";
/// Folder under the target directory that receives per-run backups.
pub const BACKUP_DIR_NAME: &str = "_backup";
/// Folder next to archive units that receives extracted localization files.
pub const EXTRACTED_DIR_NAME: &str = "_extracted";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Folder,
    Archive,
}

/// Classification of a single mod unit produced by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResult {
    pub source_kind: SourceKind,
    pub unit_name: String,
    pub unit_path: PathBuf,
    pub has_assets_root: bool,
    /// Full directory paths for folder units, archive-internal prefixes for archive units.
    /// Deduplicated and sorted case-insensitively.
    pub lang_candidates: Vec<String>,
}

impl ScanResult {
    pub fn has_candidates(&self) -> bool {
        !self.lang_candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MultiLangMode {
    #[default]
    FirstOnly,
    MergeAll,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Permanent,
    #[serde(alias = "recycle_bin")]
    Recycle,
}

/// Caller-supplied policy. The core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Options {
    pub dry_run: bool,
    pub include_archive_units: bool,
    pub multi_lang_mode: MultiLangMode,
    pub delete_mode: DeleteMode,
    pub backup_before_execute: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

pub(crate) fn is_lang_file_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    LANG_FILE_EXTENSIONS
        .iter()
        .any(|ext| lowered.ends_with(&format!(".{ext}")))
}

pub(crate) fn sort_and_dedupe_case_insensitive(values: Vec<String>) -> Vec<String> {
    let mut keyed = values
        .into_iter()
        .map(|value| (value.to_lowercase(), value))
        .collect::<Vec<_>>();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|next, kept| next.0 == kept.0);
    keyed.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::{is_lang_file_name, sort_and_dedupe_case_insensitive, DeleteMode, Options};

    #[test]
    fn dedupes_case_insensitively_keeping_first_spelling() {
        let values = vec![
            "b/lang".to_string(),
            "A/lang".to_string(),
            "a/LANG".to_string(),
        ];
        assert_eq!(
            sort_and_dedupe_case_insensitive(values),
            vec!["A/lang".to_string(), "b/lang".to_string()]
        );
    }

    #[test]
    fn recognizes_localization_extensions() {
        assert!(is_lang_file_name("en_us.json"));
        assert!(is_lang_file_name("EN_US.LANG"));
        assert!(!is_lang_file_name("readme.txt"));
        assert!(!is_lang_file_name("json"));
    }

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: Options =
            serde_json::from_str(r#"{"dry_run":true,"delete_mode":"recycle_bin"}"#)
                .expect("options parse");
        assert!(options.dry_run);
        assert_eq!(options.delete_mode, DeleteMode::Recycle);
        assert!(!options.backup_before_execute);
    }
}
