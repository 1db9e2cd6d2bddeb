pub mod db;
pub mod errors;
pub mod graph;
pub mod models;
pub mod navigation;
pub mod planner;
pub mod selection;
pub mod slots;
pub mod sync;
pub mod validation;

pub use errors::{AppError, AppResult, Guarded, Rejection};
pub use graph::{GraphChange, GraphStore};
pub use navigation::NavigationStack;
pub use planner::PlannerCore;
pub use sync::SyncQueue;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging into `<app_data_dir>/logs`, rotated daily. The level
/// comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(app_data_dir: &Path) -> AppResult<()> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "planner.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

/// Opens the planner under `app_data_dir`, creating the directory and the log
/// sink on first use.
pub fn open(app_data_dir: &Path) -> AppResult<std::sync::Arc<PlannerCore>> {
    std::fs::create_dir_all(app_data_dir)?;
    if let Err(error) = init_tracing(app_data_dir) {
        tracing::warn!(error = %error, "log file sink not installed");
    }
    PlannerCore::new(app_data_dir.to_path_buf())
}
