pub mod archive;
pub mod executor;
pub mod markdown;
pub mod model;
pub mod planner;
pub mod scan;
pub mod storage;

pub use archive::ArchiveEntry;
pub use executor::{execute, ExecuteError, ExecutionReport, LogSink};
pub use markdown::render_plan_summary;
pub use model::{
    DeleteMode, LogLevel, MultiLangMode, Options, ScanResult, SourceKind, BACKUP_DIR_NAME,
    EXTRACTED_DIR_NAME, LANG_DIR_NAME,
};
pub use planner::{
    build_plan, build_plan_with, extraction_dir, select_candidates, ExecutionPlan, LiveStorage,
    Operation, PlanPolicy, StorageView,
};
pub use scan::scan;
pub use storage::{StorageError, StorageResult};
