use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::{self, ArchiveEntry};
use crate::model::{
    MultiLangMode, Options, ScanResult, SourceKind, BACKUP_ARCHIVE_EXTENSION, EXTRACTED_DIR_NAME,
    LANG_DIR_NAME,
};
use crate::storage::path_exists;

/// One filesystem step of a plan. Paths are held by value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    EnsureDirectory {
        path: PathBuf,
    },
    MoveWithOverwrite {
        source: PathBuf,
        destination: PathBuf,
    },
    DeletePath {
        path: PathBuf,
    },
    BackupArchive {
        source_directory: PathBuf,
        archive_path: PathBuf,
    },
    ExtractArchiveEntry {
        archive_path: PathBuf,
        entry_path: String,
        destination_path: PathBuf,
    },
    /// Any `kind` this build does not know, e.g. from a plan file written by a newer version.
    #[serde(other)]
    Unsupported,
}

impl Operation {
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::EnsureDirectory { path } => write!(f, "MKDIR   {}", path.display()),
            Operation::MoveWithOverwrite {
                source,
                destination,
            } => write!(
                f,
                "MOVE    {} -> {} (overwrite)",
                source.display(),
                destination.display()
            ),
            Operation::DeletePath { path } => write!(f, "DELETE  {}", path.display()),
            Operation::BackupArchive {
                source_directory,
                archive_path,
            } => write!(
                f,
                "ZIP     {} -> {}",
                source_directory.display(),
                archive_path.display()
            ),
            Operation::ExtractArchiveEntry {
                archive_path,
                entry_path,
                destination_path,
            } => write!(
                f,
                "EXTRACT {}!{} -> {}",
                archive_path.display(),
                entry_path,
                destination_path.display()
            ),
            Operation::Unsupported => f.write_str("UNSUPPORTED operation"),
        }
    }
}

/// Which planning branch produced a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanPolicy {
    /// Folder unit: candidates consolidated into `<unit>/lang`, everything else purged.
    LangFound,
    /// Folder unit without candidates: emptied.
    LangNotFound,
    ArchiveExtract,
    ArchiveNoCandidates,
}

impl PlanPolicy {
    pub fn label(self) -> &'static str {
        match self {
            PlanPolicy::LangFound => "A (lang found)",
            PlanPolicy::LangNotFound => "B (no lang: contents purged)",
            PlanPolicy::ArchiveExtract => "archive, candidates extracted",
            PlanPolicy::ArchiveNoCandidates => "archive, no candidates",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub unit_name: String,
    pub unit_path: PathBuf,
    pub source_kind: SourceKind,
    pub lang_candidates: Vec<String>,
    pub policy: PlanPolicy,
    pub operations: Vec<Operation>,
    pub planned_move_count: u64,
    pub planned_delete_count: u64,
}

impl ExecutionPlan {
    pub fn policy_label(&self) -> &'static str {
        self.policy.label()
    }
}

/// Read-only view of storage the planner consults. Failures read as empty.
pub trait StorageView {
    /// Immediate entries of `dir`.
    fn list_dir(&self, dir: &Path) -> Vec<PathBuf>;
    fn exists(&self, path: &Path) -> bool;
    fn archive_entries(&self, archive: &Path) -> Vec<ArchiveEntry>;
}

/// View backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveStorage;

impl StorageView for LiveStorage {
    fn list_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut entries = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort_by_cached_key(|path| path.to_string_lossy().to_lowercase());
        entries
    }

    fn exists(&self, path: &Path) -> bool {
        path_exists(path)
    }

    fn archive_entries(&self, archive: &Path) -> Vec<ArchiveEntry> {
        archive::list_entries(archive).unwrap_or_default()
    }
}

pub fn build_plan(
    scan: &ScanResult,
    options: &Options,
    backup_root: Option<&Path>,
) -> ExecutionPlan {
    build_plan_with(&LiveStorage, scan, options, backup_root)
}

pub fn build_plan_with<P>(
    view: &P,
    scan: &ScanResult,
    options: &Options,
    backup_root: Option<&Path>,
) -> ExecutionPlan
where
    P: StorageView + ?Sized,
{
    let mut builder = PlanBuilder::default();

    if options.backup_before_execute {
        if let Some(root) = backup_root.filter(|root| !root.as_os_str().is_empty()) {
            builder.push(Operation::EnsureDirectory {
                path: root.to_path_buf(),
            });
            builder.push(Operation::BackupArchive {
                source_directory: scan.unit_path.clone(),
                archive_path: root.join(format!("{}.{BACKUP_ARCHIVE_EXTENSION}", scan.unit_name)),
            });
        }
    }

    let selected = select_candidates(&scan.lang_candidates, options.multi_lang_mode);
    let policy = match scan.source_kind {
        SourceKind::Archive => plan_archive_unit(view, scan, selected, &mut builder),
        SourceKind::Folder if selected.is_empty() => plan_purge(view, scan, &mut builder),
        SourceKind::Folder => plan_consolidate(view, scan, selected, &mut builder),
    };

    ExecutionPlan {
        unit_name: scan.unit_name.clone(),
        unit_path: scan.unit_path.clone(),
        source_kind: scan.source_kind,
        lang_candidates: scan.lang_candidates.clone(),
        policy,
        operations: builder.operations,
        planned_move_count: builder.moves,
        planned_delete_count: builder.deletes,
    }
}

/// Candidates are already sorted, so `FirstOnly` takes the lexicographically first.
pub fn select_candidates(candidates: &[String], mode: MultiLangMode) -> &[String] {
    match mode {
        MultiLangMode::MergeAll => candidates,
        MultiLangMode::FirstOnly => &candidates[..candidates.len().min(1)],
    }
}

/// Where an archive unit's localization files are extracted to.
pub fn extraction_dir(unit_path: &Path) -> PathBuf {
    let stem = unit_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    unit_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(EXTRACTED_DIR_NAME)
        .join(stem)
        .join(LANG_DIR_NAME)
}

#[derive(Default)]
struct PlanBuilder {
    operations: Vec<Operation>,
    moves: u64,
    deletes: u64,
}

impl PlanBuilder {
    fn push(&mut self, operation: Operation) {
        match &operation {
            Operation::MoveWithOverwrite { .. } | Operation::ExtractArchiveEntry { .. } => {
                self.moves += 1
            }
            Operation::DeletePath { .. } => self.deletes += 1,
            _ => {}
        }
        self.operations.push(operation);
    }
}

fn plan_archive_unit<P>(
    view: &P,
    scan: &ScanResult,
    selected: &[String],
    builder: &mut PlanBuilder,
) -> PlanPolicy
where
    P: StorageView + ?Sized,
{
    if selected.is_empty() {
        return PlanPolicy::ArchiveNoCandidates;
    }

    let destination_dir = extraction_dir(&scan.unit_path);
    builder.push(Operation::EnsureDirectory {
        path: destination_dir.clone(),
    });

    let entries = view.archive_entries(&scan.unit_path);
    for prefix in selected {
        for entry in archive::direct_lang_files(&entries, prefix) {
            let file_name = entry.name.rsplit('/').next().unwrap_or(&entry.name);
            builder.push(Operation::ExtractArchiveEntry {
                archive_path: scan.unit_path.clone(),
                entry_path: entry.raw_name.clone(),
                destination_path: destination_dir.join(file_name),
            });
        }
    }

    PlanPolicy::ArchiveExtract
}

fn plan_consolidate<P>(
    view: &P,
    scan: &ScanResult,
    selected: &[String],
    builder: &mut PlanBuilder,
) -> PlanPolicy
where
    P: StorageView + ?Sized,
{
    let destination_dir = scan.unit_path.join(LANG_DIR_NAME);
    builder.push(Operation::EnsureDirectory {
        path: destination_dir.clone(),
    });

    for candidate in selected {
        for entry in view.list_dir(Path::new(candidate)) {
            let Some(name) = entry.file_name() else {
                continue;
            };
            let destination = destination_dir.join(name);
            if view.exists(&destination) {
                // counted here, the delete itself happens inside the move
                builder.deletes += 1;
            }
            builder.push(Operation::MoveWithOverwrite {
                source: entry,
                destination,
            });
        }
    }

    for child in view.list_dir(&scan.unit_path) {
        let keep = child
            .file_name()
            .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(LANG_DIR_NAME));
        if !keep {
            builder.push(Operation::DeletePath { path: child });
        }
    }

    PlanPolicy::LangFound
}

fn plan_purge<P>(view: &P, scan: &ScanResult, builder: &mut PlanBuilder) -> PlanPolicy
where
    P: StorageView + ?Sized,
{
    for child in view.list_dir(&scan.unit_path) {
        builder.push(Operation::DeletePath { path: child });
    }
    PlanPolicy::LangNotFound
}
