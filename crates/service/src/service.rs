use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use lang_organizer_core::{
    build_plan, execute, scan, ExecutionPlan, LogLevel, LogSink, Operation, Options, ScanResult,
    BACKUP_DIR_NAME,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub target_dir: PathBuf,
    #[serde(default)]
    pub include_archive_units: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub target_dir: PathBuf,
    /// Scan results to process, in order.
    #[serde(default)]
    pub units: Vec<ScanResult>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Scan,
    Execute,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        self != SessionStatus::Running
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Unprocessed,
    Success,
    /// Completed, but the unit had no localization candidates.
    Warning,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitState {
    pub unit_name: String,
    pub unit_path: PathBuf,
    pub status: UnitStatus,
    pub applied_operations: usize,
    pub error: Option<String>,
}

impl UnitState {
    fn pending(result: &ScanResult) -> Self {
        Self {
            unit_name: result.unit_name.clone(),
            unit_path: result.unit_path.clone(),
            status: UnitStatus::Unprocessed,
            applied_operations: 0,
            error: None,
        }
    }

    fn for_plan(plan: &ExecutionPlan) -> Self {
        Self {
            unit_name: plan.unit_name.clone(),
            unit_path: plan.unit_path.clone(),
            status: UnitStatus::Unprocessed,
            applied_operations: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub success: usize,
    pub warning: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn from_units(units: &[UnitState]) -> Self {
        units
            .iter()
            .fold(RunSummary::default(), |mut summary, unit| {
                match unit.status {
                    UnitStatus::Success => summary.success += 1,
                    UnitStatus::Warning => summary.warning += 1,
                    UnitStatus::Failed => summary.failed += 1,
                    UnitStatus::Cancelled => summary.cancelled += 1,
                    UnitStatus::Unprocessed => {}
                }
                summary
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub time: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

/// Progress notifications from [`run_execution`] and [`run_plans`].
#[derive(Debug, Clone)]
pub enum RunEvent {
    Log(LogEntry),
    UnitStarted { index: usize, total: usize },
    UnitFinished { index: usize, unit: UnitState },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub units: Vec<UnitState>,
    pub summary: RunSummary,
    pub backup_root: Option<PathBuf>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub target_dir: PathBuf,
    /// 0.0 to 1.0.
    pub progress: f64,
    pub units: Vec<UnitState>,
    pub summary: Option<RunSummary>,
    pub backup_root: Option<PathBuf>,
    pub total_logs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone)]
struct Session {
    kind: SessionKind,
    target_dir: PathBuf,
    status: SessionStatus,
    progress: f64,
    results: Vec<ScanResult>,
    units: Vec<UnitState>,
    summary: Option<RunSummary>,
    backup_root: Option<PathBuf>,
    logs: Vec<LogEntry>,
    cancel_flag: Arc<AtomicBool>,
}

impl Session {
    fn new(kind: SessionKind, target_dir: PathBuf, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            kind,
            target_dir,
            status: SessionStatus::Running,
            progress: 0.0,
            results: Vec::new(),
            units: Vec::new(),
            summary: None,
            backup_root: None,
            logs: Vec::new(),
            cancel_flag,
        }
    }

    /// Entries are renumbered so lines from the worker and from `cancel_session` share one sequence.
    fn push_log(&mut self, time: DateTime<Local>, level: LogLevel, message: String) {
        let seq = self.logs.len() as u64 + 1;
        self.logs.push(LogEntry {
            seq,
            time,
            level,
            message,
        });
    }
}

static SESSIONS: Lazy<Mutex<HashMap<String, Session>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Starts a background scan of `request.target_dir` and returns its session id.
pub fn start_scan(request: ScanRequest) -> Result<String> {
    let session_id = register_session(
        request.session_id.clone(),
        SessionKind::Scan,
        &request.target_dir,
    )?;
    let cancel_flag = session_cancel_flag(&session_id)?;

    let thread_session_id = session_id.clone();
    thread::spawn(move || {
        let target_dir = request.target_dir;
        update_session(&thread_session_id, |session| {
            session.push_log(
                Local::now(),
                LogLevel::Info,
                format!("Scan start: {}", target_dir.display()),
            );
        });

        let (results, cancelled) =
            scan_until_cancelled(&target_dir, request.include_archive_units, &cancel_flag);

        update_session(&thread_session_id, |session| {
            let message = if cancelled {
                format!("Scan cancelled: {} mod unit(s) classified", results.len())
            } else {
                format!("Scan done: {} mod unit(s)", results.len())
            };
            session.push_log(Local::now(), LogLevel::Info, message);
            session.units = results.iter().map(UnitState::pending).collect();
            session.results = results;
            session.progress = 1.0;
            session.status = if cancelled {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Completed
            };
        });
    });

    Ok(session_id)
}

/// Scans and reports whether the stop check actually cut the scan short.
/// A cancel that lands after the last unit leaves the scan complete.
fn scan_until_cancelled(
    target_dir: &Path,
    include_archive_units: bool,
    cancel_flag: &AtomicBool,
) -> (Vec<ScanResult>, bool) {
    let mut stopped = false;
    let results = scan(target_dir, include_archive_units, |_| {
        stopped = cancel_flag.load(Ordering::Relaxed);
        stopped
    });
    (results, stopped)
}

/// Starts a background execution over previously scanned units.
pub fn start_execution(request: ExecuteRequest) -> Result<String> {
    let session_id = register_session(
        request.session_id.clone(),
        SessionKind::Execute,
        &request.target_dir,
    )?;
    let cancel_flag = session_cancel_flag(&session_id)?;

    update_session(&session_id, |session| {
        session.units = request.units.iter().map(UnitState::pending).collect();
        session.results = request.units.clone();
    });

    let thread_session_id = session_id.clone();
    thread::spawn(move || {
        let outcome = run_execution(&request, &cancel_flag, |event| {
            update_session(&thread_session_id, |session| match event {
                RunEvent::Log(entry) => session.push_log(entry.time, entry.level, entry.message),
                RunEvent::UnitStarted { index, total } => {
                    session.progress = index as f64 / total.max(1) as f64;
                }
                RunEvent::UnitFinished { index, unit } => {
                    if let Some(slot) = session.units.get_mut(index) {
                        *slot = unit;
                    }
                }
            });
        });

        update_session(&thread_session_id, |session| {
            session.units = outcome.units;
            session.summary = Some(outcome.summary);
            session.backup_root = outcome.backup_root;
            session.progress = 1.0;
            session.status = if cancel_flag.load(Ordering::Relaxed) {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Completed
            };
        });
    });

    Ok(session_id)
}

/// Processes every unit in order on the calling thread.
///
/// A failing unit is recorded and the loop moves on. When `cancel` is set the
/// current unit stops between operations and every remaining unit is marked
/// cancelled. Each unit is planned right before it runs.
pub fn run_execution<F>(request: &ExecuteRequest, cancel: &AtomicBool, mut on_event: F) -> ExecutionOutcome
where
    F: FnMut(RunEvent),
{
    let options = &request.options;
    let backup_root = options
        .backup_before_execute
        .then(|| backup_root_for(&request.target_dir, Local::now()));
    let units = request.units.iter().map(UnitState::pending).collect();
    let plans = request
        .units
        .iter()
        .map(|result| build_plan(result, options, backup_root.as_deref()));

    run_units(plans, units, options, backup_root.clone(), cancel, &mut on_event)
}

/// Runs plans loaded from a plan file, exactly as stored.
///
/// Backups happen only if the file carries backup operations, and operations
/// of unknown kind are warned about and skipped.
pub fn run_plans<F>(
    plans: &[ExecutionPlan],
    options: &Options,
    cancel: &AtomicBool,
    mut on_event: F,
) -> ExecutionOutcome
where
    F: FnMut(RunEvent),
{
    let backup_root = plans
        .iter()
        .flat_map(|plan| &plan.operations)
        .find_map(|operation| match operation {
            Operation::BackupArchive { archive_path, .. } => {
                archive_path.parent().map(Path::to_path_buf)
            }
            _ => None,
        });
    let units = plans.iter().map(UnitState::for_plan).collect();

    run_units(
        plans.iter().cloned(),
        units,
        options,
        backup_root,
        cancel,
        &mut on_event,
    )
}

fn run_units<I, F>(
    plans: I,
    mut units: Vec<UnitState>,
    options: &Options,
    backup_root: Option<PathBuf>,
    cancel: &AtomicBool,
    on_event: &mut F,
) -> ExecutionOutcome
where
    I: IntoIterator<Item = ExecutionPlan>,
    F: FnMut(RunEvent),
{
    let total = units.len();
    let mut log = EventLog {
        on_event,
        entries: Vec::new(),
    };

    log.log(
        LogLevel::Info,
        &format!(
            "Execute start: {} mod unit(s){}",
            total,
            if options.dry_run { " (dry run)" } else { "" }
        ),
    );
    if let Some(root) = &backup_root {
        log.log(
            LogLevel::Info,
            &format!("Backup destination: {}", root.display()),
        );
    }

    for (index, plan) in plans.into_iter().enumerate().take(total) {
        log.emit(RunEvent::UnitStarted { index, total });
        let unit = &mut units[index];

        match execute(&plan, options, &mut log, Some(cancel)) {
            Ok(report) => {
                unit.applied_operations = report.applied;
                unit.status = if report.cancelled {
                    UnitStatus::Cancelled
                } else if plan.lang_candidates.is_empty() {
                    UnitStatus::Warning
                } else {
                    UnitStatus::Success
                };
            }
            Err(err) => {
                unit.status = UnitStatus::Failed;
                unit.error = Some(err.source.to_string());
                log.log(
                    LogLevel::Error,
                    &format!("Unit failed: {} / {}", unit.unit_name, err.source),
                );
            }
        }
        let finished = unit.clone();
        log.emit(RunEvent::UnitFinished {
            index,
            unit: finished,
        });

        if cancel.load(Ordering::Relaxed) {
            log.log(
                LogLevel::Warn,
                "Cancel detected. Remaining mod units are skipped.",
            );
            for (rest_index, rest) in units.iter_mut().enumerate().skip(index + 1) {
                rest.status = UnitStatus::Cancelled;
                log.emit(RunEvent::UnitFinished {
                    index: rest_index,
                    unit: rest.clone(),
                });
            }
            break;
        }
    }

    let summary = RunSummary::from_units(&units);
    log.log(
        LogLevel::Info,
        &format!(
            "Summary: success={}, warning={}, failed={}, cancelled={}",
            summary.success, summary.warning, summary.failed, summary.cancelled
        ),
    );

    ExecutionOutcome {
        units,
        summary,
        backup_root,
        logs: log.entries,
    }
}

/// Plans every result as a run started now would, backup operations included
/// when the options ask for them.
pub fn build_plans(target_dir: &Path, results: &[ScanResult], options: &Options) -> Vec<ExecutionPlan> {
    let backup_root = options
        .backup_before_execute
        .then(|| backup_root_for(target_dir, Local::now()));
    results
        .iter()
        .map(|result| build_plan(result, options, backup_root.as_deref()))
        .collect()
}

pub fn write_plans(plans: &[ExecutionPlan], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(plans).context("failed to serialize plans")?;
    fs::write(path, json).with_context(|| format!("failed to write plans to {}", path.display()))
}

pub fn load_plans(path: impl AsRef<Path>) -> Result<Vec<ExecutionPlan>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse plan file {}", path.display()))
}

/// `<target>/_backup/<yyyyMMdd_HHmmss>` for a run started at `started_at`.
pub fn backup_root_for(target_dir: &Path, started_at: DateTime<Local>) -> PathBuf {
    target_dir
        .join(BACKUP_DIR_NAME)
        .join(started_at.format("%Y%m%d_%H%M%S").to_string())
}

/// One `time<TAB>LEVEL<TAB>message` line per entry.
pub fn export_log_text(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            entry.time.format("%Y-%m-%d %H:%M:%S"),
            entry.level,
            entry.message
        ));
    }
    out
}

pub fn write_log_file(entries: &[LogEntry], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, export_log_text(entries))
        .with_context(|| format!("failed to write log to {}", path.display()))
}

pub fn export_session_log(session_id: &str, path: impl AsRef<Path>) -> Result<()> {
    let entries = poll_logs(session_id, 0)?;
    write_log_file(&entries, path)
}

pub fn poll_logs(session_id: &str, from_seq: u64) -> Result<Vec<LogEntry>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

    Ok(session
        .logs
        .iter()
        .filter(|entry| entry.seq > from_seq)
        .cloned()
        .collect())
}

pub fn scan_results(session_id: &str) -> Result<Vec<ScanResult>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    Ok(session.results.clone())
}

pub fn cancel_session(session_id: &str) -> Result<CancelResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

    if session.status == SessionStatus::Running && !session.cancel_flag.load(Ordering::Relaxed) {
        session.cancel_flag.store(true, Ordering::Relaxed);
        let message = match session.kind {
            SessionKind::Scan => "Cancel requested (scan stops before the next mod unit)",
            SessionKind::Execute => "Cancel requested (execution stops before the next operation)",
        };
        warn!("{message}");
        session.push_log(Local::now(), LogLevel::Warn, message.to_string());
    }

    Ok(CancelResponse {
        session_id: session_id.to_string(),
        status: session.status,
    })
}

pub fn get_session(session_id: &str) -> Result<SessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

    Ok(SessionSnapshot {
        session_id: session_id.to_string(),
        kind: session.kind,
        status: session.status,
        target_dir: session.target_dir.clone(),
        progress: session.progress,
        units: session.units.clone(),
        summary: session.summary,
        backup_root: session.backup_root.clone(),
        total_logs: session.logs.len() as u64,
    })
}

/// Drops a finished session and its logs.
pub fn remove_session(session_id: &str) -> Result<()> {
    let mut sessions = lock_sessions()?;
    match sessions.get(session_id) {
        None => bail!("session not found: {session_id}"),
        Some(session) if !session.status.is_finished() => {
            bail!("session is still running: {session_id}")
        }
        Some(_) => {
            sessions.remove(session_id);
            Ok(())
        }
    }
}

fn register_session(
    requested_id: Option<String>,
    kind: SessionKind,
    target_dir: &Path,
) -> Result<String> {
    if !target_dir.is_dir() {
        bail!("target directory not found: {}", target_dir.display());
    }

    let session_id = requested_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut sessions = lock_sessions()?;
    if let Some(running) = sessions
        .values()
        .find(|session| session.status == SessionStatus::Running && session.target_dir == target_dir)
    {
        bail!(
            "a {:?} session is already running for {}",
            running.kind,
            target_dir.display()
        );
    }
    if sessions.contains_key(&session_id) {
        bail!("session id already in use: {session_id}");
    }

    sessions.insert(
        session_id.clone(),
        Session::new(
            kind,
            target_dir.to_path_buf(),
            Arc::new(AtomicBool::new(false)),
        ),
    );
    info!("{kind:?} session {session_id} started for {}", target_dir.display());
    Ok(session_id)
}

fn session_cancel_flag(session_id: &str) -> Result<Arc<AtomicBool>> {
    let sessions = lock_sessions()?;
    sessions
        .get(session_id)
        .map(|session| Arc::clone(&session.cancel_flag))
        .ok_or_else(|| anyhow!("session not found: {session_id}"))
}

fn update_session(session_id: &str, apply: impl FnOnce(&mut Session)) {
    match lock_sessions() {
        Ok(mut sessions) => {
            if let Some(session) = sessions.get_mut(session_id) {
                apply(session);
            }
        }
        Err(err) => error!("dropping update for session {session_id}: {err}"),
    }
}

fn lock_sessions() -> Result<std::sync::MutexGuard<'static, HashMap<String, Session>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("session registry lock poisoned"))
}

/// Collects executor lines, mirrors them to tracing and forwards them as events.
struct EventLog<'a, F> {
    on_event: &'a mut F,
    entries: Vec<LogEntry>,
}

impl<F> EventLog<'_, F>
where
    F: FnMut(RunEvent),
{
    fn emit(&mut self, event: RunEvent) {
        (self.on_event)(event)
    }
}

impl<F> LogSink for EventLog<'_, F>
where
    F: FnMut(RunEvent),
{
    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        let entry = LogEntry {
            seq: self.entries.len() as u64 + 1,
            time: Local::now(),
            level,
            message: message.to_string(),
        };
        self.entries.push(entry.clone());
        (self.on_event)(RunEvent::Log(entry));
    }
}
