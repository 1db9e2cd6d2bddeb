use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type TaskId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    #[default]
    Normal,
    Quick,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Quick => "quick",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Active,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub sync_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub last_worked_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub difficulty: Difficulty,
    pub link: Option<String>,
    pub recurrence_days: Option<u32>,
    pub next_due_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none() && self.skipped_at.is_none()
    }

    pub fn status(&self) -> TaskStatus {
        if self.completed_at.is_some() {
            TaskStatus::Completed
        } else if self.skipped_at.is_some() {
            TaskStatus::Skipped
        } else {
            TaskStatus::Active
        }
    }

    pub fn worked_on(&self, day: NaiveDate) -> bool {
        self.last_worked_at
            .map(|at| at.date_naive() == day)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyEdge {
    pub parent_id: TaskId,
    pub child_id: TaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub task_id: TaskId,
    pub depends_on_id: TaskId,
}

/// One calendar day's working set. Identities are weak references: a listed
/// task may have been deleted since the snapshot was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySelection {
    pub day: NaiveDate,
    pub task_ids: Vec<TaskId>,
    pub completed: BTreeSet<TaskId>,
    pub worked: BTreeSet<TaskId>,
    pub pinned: BTreeSet<TaskId>,
}

impl DailySelection {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            task_ids: Vec::new(),
            completed: BTreeSet::new(),
            worked: BTreeSet::new(),
            pinned: BTreeSet::new(),
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.task_ids.contains(&task_id)
    }

    pub fn is_protected(&self, task_id: TaskId) -> bool {
        self.pinned.contains(&task_id) || self.completed.contains(&task_id)
    }
}

/// Everything needed to put a single deleted task back where it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedTask {
    pub task: Task,
    pub parent_ids: Vec<TaskId>,
    pub child_ids: Vec<TaskId>,
    pub depends_on_ids: Vec<TaskId>,
    pub dependent_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DeleteUndo {
    Single(RemovedTask),
    Reparented {
        removed: RemovedTask,
        created_links: Vec<HierarchyEdge>,
    },
    Subtree {
        tasks: Vec<Task>,
        links: Vec<HierarchyEdge>,
        dependencies: Vec<DependencyEdge>,
    },
}

impl DeleteUndo {
    pub fn removed_ids(&self) -> Vec<TaskId> {
        match self {
            Self::Single(removed) | Self::Reparented { removed, .. } => vec![removed.task.id],
            Self::Subtree { tasks, .. } => tasks.iter().map(|task| task.id).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUndo {
    pub task_id: TaskId,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveUndo {
    pub task_id: TaskId,
    pub from_parent_id: TaskId,
    pub to_parent_id: TaskId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub name: String,
    pub priority: Option<Priority>,
    pub difficulty: Option<Difficulty>,
    pub link: Option<String>,
    pub recurrence_days: Option<u32>,
    pub parent_id: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionWeights {
    pub high_priority: f64,
    pub started: f64,
    pub staleness_per_day: f64,
    pub staleness_cap_days: u32,
    pub repeat_penalty: f64,
    pub repeat_penalty_floor: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            high_priority: 3.0,
            started: 1.25,
            staleness_per_day: 0.1,
            staleness_cap_days: 14,
            repeat_penalty: 0.6,
            repeat_penalty_floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub selection: SelectionWeights,
    pub history_days: u32,
    pub sync_debounce_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            selection: SelectionWeights::default(),
            history_days: 14,
            sync_debounce_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Active,
    Completed,
    Skipped,
    Deleted,
}

impl From<TaskStatus> for SyncStatus {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Active => Self::Active,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Skipped => Self::Skipped,
        }
    }
}

/// Flat record exchanged with the remote sync collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub sync_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub last_worked_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub difficulty: Difficulty,
    pub link: Option<String>,
    pub recurrence_days: Option<u32>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub status: SyncStatus,
}

impl SyncRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            sync_id: task.sync_id.clone(),
            name: task.name.clone(),
            created_at: task.created_at,
            completed_at: task.completed_at,
            started_at: task.started_at,
            skipped_at: task.skipped_at,
            last_worked_at: task.last_worked_at,
            priority: task.priority,
            difficulty: task.difficulty,
            link: task.link.clone(),
            recurrence_days: task.recurrence_days,
            next_due_at: task.next_due_at,
            last_modified: task.updated_at,
            status: task.status().into(),
        }
    }

    pub fn tombstone(task: &Task, deleted_at: DateTime<Utc>) -> Self {
        Self {
            last_modified: deleted_at,
            status: SyncStatus::Deleted,
            ..Self::from_task(task)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    ReplaceLocalWithRemote,
    ReplaceRemoteWithLocal,
    Union,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Records left unapplied because reactivating the task would close a cycle.
    pub rejected: usize,
}
