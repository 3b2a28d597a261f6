pub mod service;
pub mod settings;

pub use service::{
    backup_root_for, build_plans, cancel_session, export_log_text, export_session_log,
    get_session, load_plans, poll_logs, remove_session, run_execution, run_plans, scan_results,
    start_execution, start_scan, write_log_file, write_plans, CancelResponse, ExecuteRequest,
    ExecutionOutcome, LogEntry, RunEvent, RunSummary, ScanRequest, SessionKind, SessionSnapshot,
    SessionStatus, UnitState, UnitStatus,
};
pub use settings::{PersistedSettings, DEFAULT_SETTINGS_PATH, SETTINGS_SCHEMA_VERSION};
