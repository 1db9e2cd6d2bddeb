use crate::models::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("STORAGE: {0}")]
    Storage(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Expected refusals. These leave the graph and the daily snapshot untouched
/// and are meant to be branched on, not reported as faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("a task cannot be linked to itself")]
    SelfEdge,
    #[error("edge would create a cycle")]
    WouldCreateCycle,
    #[error("edge already exists")]
    DuplicateEdge,
    #[error("edge does not exist")]
    MissingEdge,
    #[error("task {0} no longer exists")]
    TaskMissing(TaskId),
    #[error("task {0} already exists")]
    IdentityConflict(TaskId),
    #[error("pinned task limit reached")]
    PinCapacity,
    #[error("daily slot limit reached")]
    SlotCapacity,
    #[error("slot is pinned or completed")]
    ProtectedSlot,
    #[error("task {0} is not in the daily set")]
    NotInDailySet(TaskId),
    #[error("task {0} is already in the daily set")]
    AlreadyInDailySet(TaskId),
    #[error("no eligible task to draw")]
    NothingToDraw,
}

pub type Guarded<T> = Result<T, Rejection>;
