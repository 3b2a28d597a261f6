use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lang_organizer_core::{
    render_plan_summary, scan, DeleteMode, MultiLangMode, Options, ScanResult, SourceKind,
};
use lang_organizer_service::{
    build_plans, load_plans, run_execution, run_plans, write_log_file, write_plans,
    ExecuteRequest, ExecutionOutcome, PersistedSettings, RunEvent, UnitStatus,
    DEFAULT_SETTINGS_PATH,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "lang-organizer",
    version,
    about = "Consolidate each mod's localization folder into <mod>/lang and clear out the rest."
)]
struct Cli {
    /// Settings file holding the last target directory and policy.
    #[arg(long, global = true, value_name = "FILE", default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify mod units and list their localization candidates.
    Scan(ScanArgs),
    /// Show the operations each mod unit would go through.
    Plan(PlanArgs),
    /// Apply the plans. Destructive unless --dry-run is set.
    Execute(ExecuteArgs),
    /// Print the effective settings.
    Settings(PolicyArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliMultiLangMode {
    #[value(name = "first-only", alias = "first")]
    FirstOnly,
    #[value(name = "merge-all", alias = "merge")]
    MergeAll,
}

impl From<CliMultiLangMode> for MultiLangMode {
    fn from(value: CliMultiLangMode) -> Self {
        match value {
            CliMultiLangMode::FirstOnly => MultiLangMode::FirstOnly,
            CliMultiLangMode::MergeAll => MultiLangMode::MergeAll,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDeleteMode {
    Permanent,
    #[value(name = "recycle", alias = "trash")]
    Recycle,
}

impl From<CliDeleteMode> for DeleteMode {
    fn from(value: CliDeleteMode) -> Self {
        match value {
            CliDeleteMode::Permanent => DeleteMode::Permanent,
            CliDeleteMode::Recycle => DeleteMode::Recycle,
        }
    }
}

/// Policy overrides. Anything left unset comes from the settings file.
#[derive(Debug, Args)]
struct PolicyArgs {
    /// Folder whose immediate children are mod units.
    #[arg(long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Log operations without touching the filesystem.
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    dry_run: Option<bool>,

    /// Also process `.jar` archive units (their localization files are extracted).
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    archives: Option<bool>,

    /// How to handle a unit with several localization folders.
    #[arg(long, value_name = "MODE")]
    multi_lang: Option<CliMultiLangMode>,

    /// Shorthand for `--multi-lang merge-all`.
    #[arg(long, conflicts_with = "multi_lang")]
    merge_all: bool,

    /// How removed entries are deleted.
    #[arg(long, value_name = "MODE")]
    delete_mode: Option<CliDeleteMode>,

    /// Shorthand for `--delete-mode recycle`.
    #[arg(long, conflicts_with = "delete_mode")]
    recycle: bool,

    /// Zip each unit into <target>/_backup/<timestamp>/ before changing it.
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    backup: Option<bool>,

    /// Write the effective target and policy back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[command(flatten)]
    policy: PolicyArgs,

    /// Write scan results as JSON.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[command(flatten)]
    policy: PolicyArgs,

    /// Write plans as JSON, ready for `execute --plan`.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a markdown summary of the plans.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,

    /// Print every planned operation, not only the counters.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    #[command(flatten)]
    policy: PolicyArgs,

    /// Run the plans in this file (from `plan --output`) instead of scanning.
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,

    /// Confirm a run that modifies the target directory.
    #[arg(long)]
    yes: bool,

    /// Export the run log (`time<TAB>LEVEL<TAB>message`) to this file.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ScanOutput<'a> {
    target_dir: &'a Path,
    units: &'a [ScanResult],
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan_command(&cli.settings, args),
        Commands::Plan(args) => run_plan_command(&cli.settings, args),
        Commands::Execute(args) => run_execute_command(&cli.settings, args),
        Commands::Settings(args) => run_settings_command(&cli.settings, args),
    }
}

fn run_scan_command(settings_path: &Path, args: ScanArgs) -> Result<()> {
    let (target_dir, options) = resolve_settings(settings_path, &args.policy)?;
    let results = scan(&target_dir, options.include_archive_units, |_| false);

    println!(
        "Scanned {}: {} mod unit(s), {} without localization.",
        target_dir.display(),
        results.len(),
        results.iter().filter(|result| !result.has_candidates()).count()
    );
    for result in &results {
        println!(
            "- {} [{}] assets={} candidates={}",
            result.unit_name,
            source_kind_label(result.source_kind),
            result.has_assets_root,
            result.lang_candidates.len()
        );
        for candidate in &result.lang_candidates {
            println!("    {}", candidate);
        }
    }

    if let Some(output) = args.output {
        let payload = serde_json::to_string_pretty(&ScanOutput {
            target_dir: &target_dir,
            units: &results,
        })
        .context("failed to serialize scan results")?;
        fs::write(&output, payload)
            .with_context(|| format!("failed to write scan results to {}", output.display()))?;
        println!("Scan results written to {}", output.display());
    }

    Ok(())
}

fn run_plan_command(settings_path: &Path, args: PlanArgs) -> Result<()> {
    let (target_dir, options) = resolve_settings(settings_path, &args.policy)?;
    let results = scan(&target_dir, options.include_archive_units, |_| false);
    let plans = build_plans(&target_dir, &results, &options);

    let total_moves: u64 = plans.iter().map(|plan| plan.planned_move_count).sum();
    let total_deletes: u64 = plans.iter().map(|plan| plan.planned_delete_count).sum();
    println!(
        "Planned {} mod unit(s) in {}: {} move(s), {} delete(s).",
        plans.len(),
        target_dir.display(),
        total_moves,
        total_deletes
    );
    for plan in &plans {
        println!(
            "- {}: {} | moves {} | deletes {}",
            plan.unit_name,
            plan.policy_label(),
            plan.planned_move_count,
            plan.planned_delete_count
        );
        if args.verbose {
            for operation in &plan.operations {
                println!("    {}", operation);
            }
        }
    }

    if let Some(output) = args.output {
        write_plans(&plans, &output)?;
        println!("Plans written to {}", output.display());
    }

    if let Some(md_path) = args.md {
        fs::write(&md_path, render_plan_summary(&plans)).with_context(|| {
            format!("failed to write markdown summary to {}", md_path.display())
        })?;
        println!("Markdown summary written to {}", md_path.display());
    }

    Ok(())
}

fn run_execute_command(settings_path: &Path, args: ExecuteArgs) -> Result<()> {
    if let Some(plan_file) = &args.plan {
        return run_plan_file(settings_path, plan_file, &args);
    }

    let (target_dir, options) = resolve_settings(settings_path, &args.policy)?;
    let units = scan(&target_dir, options.include_archive_units, |_| false);

    let archive_count = units
        .iter()
        .filter(|unit| unit.source_kind == SourceKind::Archive)
        .count();
    let purge_count = units
        .iter()
        .filter(|unit| unit.source_kind == SourceKind::Folder && !unit.has_candidates())
        .count();
    println!("Target: {}", target_dir.display());
    println!(
        "Mod units: {} ({} archive(s), extracted only; {} without localization, emptied)",
        units.len(),
        archive_count,
        purge_count
    );
    println!(
        "Dry run: {} | multi-lang: {:?} | delete: {:?} | backup: {}",
        on_off(options.dry_run),
        options.multi_lang_mode,
        options.delete_mode,
        on_off(options.backup_before_execute)
    );

    if !options.dry_run && !args.yes {
        bail!("refusing to modify {} without --yes", target_dir.display());
    }

    let request = ExecuteRequest {
        session_id: None,
        target_dir,
        units,
        options,
    };
    let cancel = AtomicBool::new(false);
    let outcome = run_execution(&request, &cancel, print_failures(request.units.len()));
    finish_run(&outcome, args.log_file.as_deref())
}

fn run_plan_file(settings_path: &Path, plan_file: &Path, args: &ExecuteArgs) -> Result<()> {
    let options = resolve_options(settings_path, &args.policy)?;
    let plans = load_plans(plan_file)?;

    println!("Plan file: {}", plan_file.display());
    println!(
        "Mod units: {} | operations: {}",
        plans.len(),
        plans.iter().map(|plan| plan.operations.len()).sum::<usize>()
    );
    println!(
        "Dry run: {} | delete: {:?}",
        on_off(options.dry_run),
        options.delete_mode
    );

    if !options.dry_run && !args.yes {
        bail!("refusing to run {} without --yes", plan_file.display());
    }

    let cancel = AtomicBool::new(false);
    let outcome = run_plans(&plans, &options, &cancel, print_failures(plans.len()));
    finish_run(&outcome, args.log_file.as_deref())
}

fn print_failures(total: usize) -> impl FnMut(RunEvent) {
    move |event| {
        if let RunEvent::UnitFinished { index, unit } = event {
            if unit.status == UnitStatus::Failed {
                println!(
                    "[{}/{}] {} failed: {}",
                    index + 1,
                    total,
                    unit.unit_name,
                    unit.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

fn finish_run(outcome: &ExecutionOutcome, log_file: Option<&Path>) -> Result<()> {
    println!(
        "Done. success {} | warning {} | failed {} | cancelled {}",
        outcome.summary.success,
        outcome.summary.warning,
        outcome.summary.failed,
        outcome.summary.cancelled
    );
    if let Some(root) = &outcome.backup_root {
        println!("Backups written to {}", root.display());
    }

    if let Some(log_file) = log_file {
        write_log_file(&outcome.logs, log_file)?;
        println!("Log written to {}", log_file.display());
    }

    if outcome.summary.failed > 0 {
        bail!("{} mod unit(s) failed", outcome.summary.failed);
    }
    Ok(())
}

fn run_settings_command(settings_path: &Path, args: PolicyArgs) -> Result<()> {
    let mut settings = PersistedSettings::load_or_default(settings_path);
    apply_overrides(&mut settings, &args);
    if args.save_settings {
        settings.save(settings_path)?;
        println!("Settings saved to {}", settings_path.display());
    }

    let payload =
        serde_json::to_string_pretty(&settings).context("failed to serialize settings")?;
    println!("{}", payload);
    Ok(())
}

/// Loads persisted settings, layers the command-line overrides on top and
/// returns the target directory to work on.
fn resolve_settings(settings_path: &Path, args: &PolicyArgs) -> Result<(PathBuf, Options)> {
    let mut settings = PersistedSettings::load_or_default(settings_path);
    apply_overrides(&mut settings, args);

    let Some(target_dir) = settings.target_dir.clone() else {
        bail!("no target directory; pass --target or save one with --save-settings");
    };
    if !target_dir.is_dir() {
        bail!("target directory not found: {}", target_dir.display());
    }

    if args.save_settings {
        settings.save(settings_path)?;
        info!("settings saved to {}", settings_path.display());
    }
    Ok((target_dir, settings.options))
}

/// Policy only, for runs that take their units from a plan file.
fn resolve_options(settings_path: &Path, args: &PolicyArgs) -> Result<Options> {
    let mut settings = PersistedSettings::load_or_default(settings_path);
    apply_overrides(&mut settings, args);
    if args.save_settings {
        settings.save(settings_path)?;
        info!("settings saved to {}", settings_path.display());
    }
    Ok(settings.options)
}

fn apply_overrides(settings: &mut PersistedSettings, args: &PolicyArgs) {
    if let Some(target) = &args.target {
        settings.target_dir = Some(target.clone());
    }
    let options = &mut settings.options;
    if let Some(dry_run) = args.dry_run {
        options.dry_run = dry_run;
    }
    if let Some(archives) = args.archives {
        options.include_archive_units = archives;
    }
    if let Some(mode) = args.multi_lang {
        options.multi_lang_mode = mode.into();
    }
    if args.merge_all {
        options.multi_lang_mode = MultiLangMode::MergeAll;
    }
    if let Some(mode) = args.delete_mode {
        options.delete_mode = mode.into();
    }
    if args.recycle {
        options.delete_mode = DeleteMode::Recycle;
    }
    if let Some(backup) = args.backup {
        options.backup_before_execute = backup;
    }
}

fn source_kind_label(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Folder => "folder",
        SourceKind::Archive => "archive",
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
