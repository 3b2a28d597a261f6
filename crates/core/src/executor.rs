//! Applies an [`ExecutionPlan`] through the storage primitives.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::model::{LogLevel, Options};
use crate::planner::{ExecutionPlan, Operation};
use crate::storage::{self, StorageError};

const DRY_RUN_PREFIX: &str = "[DRY-RUN] ";

/// Receives the user-facing lines the executor emits.
pub trait LogSink {
    fn log(&mut self, level: LogLevel, message: &str);
}

impl<F> LogSink for F
where
    F: FnMut(LogLevel, &str),
{
    fn log(&mut self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

#[derive(Error, Debug)]
#[error("operation failed: {operation}")]
pub struct ExecuteError {
    pub operation: String,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Operations dispatched to storage, or logged only under dry-run.
    pub applied: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Runs the plan's operations in order.
///
/// Cancellation is checked before each operation and leaves already-applied
/// operations in place. The first failing primitive stops the plan and is
/// returned after being logged.
pub fn execute<S>(
    plan: &ExecutionPlan,
    options: &Options,
    sink: &mut S,
    cancel: Option<&AtomicBool>,
) -> Result<ExecutionReport, ExecuteError>
where
    S: LogSink + ?Sized,
{
    let mut report = ExecutionReport::default();
    let prefix = if options.dry_run { DRY_RUN_PREFIX } else { "" };

    for operation in &plan.operations {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            report.cancelled = true;
            break;
        }

        let description = operation.describe();
        sink.log(LogLevel::Info, &format!("{prefix}{description}"));
        if matches!(operation, Operation::Unsupported) {
            sink.log(
                LogLevel::Warn,
                &format!("{prefix}Skipping unsupported operation in plan for {}", plan.unit_name),
            );
            report.skipped += 1;
            continue;
        }

        if options.dry_run {
            report.applied += 1;
            continue;
        }

        if let Err(err) = apply(operation, options) {
            error!("{} failed for {}: {}", description, plan.unit_name, err);
            sink.log(
                LogLevel::Error,
                &format!("Operation failed: {description} / {err}"),
            );
            return Err(ExecuteError {
                operation: description,
                source: err,
            });
        }
        report.applied += 1;
    }

    Ok(report)
}

fn apply(operation: &Operation, options: &Options) -> Result<(), StorageError> {
    match operation {
        Operation::EnsureDirectory { path } => storage::ensure_directory(path),
        Operation::MoveWithOverwrite {
            source,
            destination,
        } => storage::move_with_overwrite(source, destination, options.delete_mode),
        Operation::DeletePath { path } => storage::delete_path(path, options.delete_mode),
        Operation::BackupArchive {
            source_directory,
            archive_path,
        } => storage::backup_archive(source_directory, archive_path),
        Operation::ExtractArchiveEntry {
            archive_path,
            entry_path,
            destination_path,
        } => storage::extract_archive_entry(archive_path, entry_path, destination_path),
        Operation::Unsupported => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tempfile::tempdir;

    use super::{execute, ExecutionReport};
    use crate::model::{LogLevel, Options, SourceKind};
    use crate::planner::{ExecutionPlan, Operation, PlanPolicy};
    use crate::storage::StorageError;

    fn plan_of(unit: &Path, operations: Vec<Operation>) -> ExecutionPlan {
        ExecutionPlan {
            unit_name: "ModA".to_string(),
            unit_path: unit.to_path_buf(),
            source_kind: SourceKind::Folder,
            lang_candidates: Vec::new(),
            policy: PlanPolicy::LangNotFound,
            operations,
            planned_move_count: 0,
            planned_delete_count: 0,
        }
    }

    #[test]
    fn dry_run_logs_every_operation_and_touches_nothing() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(unit.join("assets")).expect("mkdir");
        fs::write(unit.join("mod.toml"), "x").expect("write");

        let plan = plan_of(
            &unit,
            vec![
                Operation::EnsureDirectory {
                    path: unit.join("lang"),
                },
                Operation::DeletePath {
                    path: unit.join("assets"),
                },
                Operation::DeletePath {
                    path: unit.join("mod.toml"),
                },
            ],
        );
        let options = Options {
            dry_run: true,
            ..Options::default()
        };

        let mut lines = Vec::new();
        let mut sink = |level: LogLevel, message: &str| lines.push((level, message.to_string()));
        let report = execute(&plan, &options, &mut sink, None).expect("dry run");

        assert_eq!(report.applied, 3);
        assert_eq!(lines.len(), 3);
        assert!(lines
            .iter()
            .all(|(level, line)| *level == LogLevel::Info && line.starts_with("[DRY-RUN] ")));
        assert!(!unit.join("lang").exists());
        assert!(unit.join("assets").exists());
        assert!(unit.join("mod.toml").exists());
    }

    #[test]
    fn failure_stops_remaining_operations() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(&unit).expect("mkdir");
        fs::write(unit.join("keep.txt"), "x").expect("write");

        let plan = plan_of(
            &unit,
            vec![
                Operation::EnsureDirectory {
                    path: unit.join("lang"),
                },
                Operation::MoveWithOverwrite {
                    source: unit.join("missing.json"),
                    destination: unit.join("lang/missing.json"),
                },
                Operation::DeletePath {
                    path: unit.join("keep.txt"),
                },
            ],
        );

        let mut lines = Vec::new();
        let mut sink = |level: LogLevel, message: &str| lines.push((level, message.to_string()));
        let err = execute(&plan, &Options::default(), &mut sink, None)
            .expect_err("missing source fails");

        assert!(matches!(err.source, StorageError::NotFound(_)));
        assert!(err.operation.starts_with("MOVE"));
        assert!(unit.join("lang").is_dir());
        assert!(unit.join("keep.txt").exists());
        let (level, last) = lines.last().expect("error line");
        assert_eq!(*level, LogLevel::Error);
        assert!(last.starts_with("Operation failed: MOVE"));
    }

    #[test]
    fn cancellation_before_start_applies_nothing() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(&unit).expect("mkdir");
        fs::write(unit.join("a.txt"), "x").expect("write");

        let plan = plan_of(
            &unit,
            vec![Operation::DeletePath {
                path: unit.join("a.txt"),
            }],
        );
        let cancel = AtomicBool::new(true);
        let mut sink = |_: LogLevel, _: &str| {};

        let report = execute(&plan, &Options::default(), &mut sink, Some(&cancel)).expect("ok");

        assert_eq!(
            report,
            ExecutionReport {
                applied: 0,
                skipped: 0,
                cancelled: true,
            }
        );
        assert!(unit.join("a.txt").exists());
    }

    #[test]
    fn cancel_between_operations_keeps_applied_ones() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(&unit).expect("mkdir");
        fs::write(unit.join("a.txt"), "x").expect("write");
        fs::write(unit.join("b.txt"), "x").expect("write");

        let plan = plan_of(
            &unit,
            vec![
                Operation::DeletePath {
                    path: unit.join("a.txt"),
                },
                Operation::DeletePath {
                    path: unit.join("b.txt"),
                },
            ],
        );
        let cancel = AtomicBool::new(false);
        // the first log line arrives while the first delete is in flight
        let mut sink = |_: LogLevel, _: &str| cancel.store(true, Ordering::Relaxed);

        let report = execute(&plan, &Options::default(), &mut sink, Some(&cancel)).expect("ok");

        assert_eq!(
            report,
            ExecutionReport {
                applied: 1,
                skipped: 0,
                cancelled: true,
            }
        );
        assert!(!unit.join("a.txt").exists());
        assert!(unit.join("b.txt").exists());
    }

    #[test]
    fn unsupported_operation_is_warned_and_skipped() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        fs::create_dir_all(&unit).expect("mkdir");

        let plan = plan_of(
            &unit,
            vec![
                Operation::Unsupported,
                Operation::EnsureDirectory {
                    path: unit.join("lang"),
                },
            ],
        );
        let mut lines = Vec::new();
        let mut sink = |level: LogLevel, message: &str| lines.push((level, message.to_string()));

        let report = execute(&plan, &Options::default(), &mut sink, None).expect("ok");

        assert_eq!(report.skipped, 1);
        assert_eq!(report.applied, 1);
        let levels = lines.iter().map(|(level, _)| *level).collect::<Vec<_>>();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Warn, LogLevel::Info]);
        assert_eq!(lines[0].1, "UNSUPPORTED operation");
        assert!(unit.join("lang").is_dir());
    }
}
