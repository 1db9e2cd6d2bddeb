//! Graph Store: the single owner of tasks, hierarchy edges and dependency
//! edges. Every multi-step mutation runs inside one database transaction and
//! re-checks acyclicity against an index built inside that transaction.

mod delete;
mod edges;
pub mod index;
mod sync;

pub use index::{GraphIndex, Relation};
pub use sync::{RemoteMerge, UpsertOutcome};

use crate::db::{self, Database};
use crate::errors::{AppResult, Guarded, Rejection};
use crate::models::{
    CreateTaskPayload, Difficulty, HierarchyEdge, Priority, StatusUndo, SyncRecord, Task, TaskId,
};
use crate::validation::{check_recurrence, normalize_link, normalize_name};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Emitted after a mutation commits.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    Upserted(Vec<TaskId>),
    Deleted(Vec<SyncRecord>),
}

pub type ChangeListener = Arc<dyn Fn(&GraphChange) + Send + Sync>;

#[derive(Clone)]
pub struct GraphStore {
    db: Arc<Database>,
    listener: Arc<RwLock<Option<ChangeListener>>>,
}

impl GraphStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            listener: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_change_listener(&self, listener: ChangeListener) {
        match self.listener.write() {
            Ok(mut writer) => *writer = Some(listener),
            Err(_) => tracing::warn!("graph change listener lock poisoned; listener not installed"),
        }
    }

    fn emit(&self, change: GraphChange) {
        let listener = match self.listener.read() {
            Ok(reader) => reader.clone(),
            Err(_) => {
                tracing::warn!("graph change listener lock poisoned; dropping change");
                return;
            }
        };
        if let Some(listener) = listener {
            listener(&change);
        }
    }

    pub fn create_task(&self, payload: CreateTaskPayload) -> AppResult<Guarded<Task>> {
        let outcome = self.db.write_guarded(|tx| insert_new_task(tx, &payload))?;
        if let Ok(task) = &outcome {
            self.announce_created(task, payload.parent_id);
        }
        Ok(outcome)
    }

    /// Reports a task inserted through [`insert_new_task`] once its
    /// transaction has committed.
    pub(crate) fn announce_created(&self, task: &Task, parent_id: Option<TaskId>) {
        tracing::info!(task_id = task.id, parent_id = ?parent_id, "task created");
        self.emit(GraphChange::Upserted(vec![task.id]));
    }

    pub fn get_task(&self, task_id: TaskId) -> AppResult<Option<Task>> {
        self.db.read(|conn| db::tasks::get_task(conn, task_id))
    }

    pub fn list_tasks(&self, active_only: bool) -> AppResult<Vec<Task>> {
        self.db.read(|conn| db::tasks::list_tasks(conn, active_only))
    }

    /// Tasks for `ids` in the given order; missing identities are skipped.
    pub fn tasks_by_ids(&self, ids: &[TaskId]) -> AppResult<Vec<Task>> {
        self.db.read(|conn| db::tasks::list_tasks_by_ids(conn, ids))
    }

    pub fn rename(&self, task_id: TaskId, name: &str) -> AppResult<Guarded<Task>> {
        let name = normalize_name(name)?;
        self.modify(task_id, "rename", |task| task.name = name)
    }

    pub fn set_priority(&self, task_id: TaskId, priority: Priority) -> AppResult<Guarded<Task>> {
        self.modify(task_id, "set-priority", |task| task.priority = priority)
    }

    pub fn set_difficulty(
        &self,
        task_id: TaskId,
        difficulty: Difficulty,
    ) -> AppResult<Guarded<Task>> {
        self.modify(task_id, "set-difficulty", |task| task.difficulty = difficulty)
    }

    pub fn set_link(&self, task_id: TaskId, link: Option<&str>) -> AppResult<Guarded<Task>> {
        let link = normalize_link(link)?;
        self.modify(task_id, "set-link", |task| task.link = link)
    }

    pub fn set_recurrence(&self, task_id: TaskId, days: Option<u32>) -> AppResult<Guarded<Task>> {
        let days = check_recurrence(days)?;
        self.modify(task_id, "set-recurrence", |task| {
            task.recurrence_days = days;
            if days.is_none() {
                task.next_due_at = None;
            }
        })
    }

    /// Records the first time work started; later calls keep the original stamp.
    pub fn mark_started(&self, task_id: TaskId) -> AppResult<Guarded<Task>> {
        let now = Utc::now();
        self.modify(task_id, "mark-started", |task| {
            task.started_at.get_or_insert(now);
        })
    }

    pub fn mark_worked(&self, task_id: TaskId, at: DateTime<Utc>) -> AppResult<Guarded<Task>> {
        self.modify(task_id, "mark-worked", |task| task.last_worked_at = Some(at))
    }

    pub fn complete(&self, task_id: TaskId) -> AppResult<Guarded<StatusUndo>> {
        let now = Utc::now();
        self.change_status(task_id, "complete", |task| {
            task.completed_at = Some(now);
            task.skipped_at = None;
            task.next_due_at = task
                .recurrence_days
                .map(|days| now + Duration::days(i64::from(days)));
        })
    }

    pub fn skip(&self, task_id: TaskId) -> AppResult<Guarded<StatusUndo>> {
        let now = Utc::now();
        self.change_status(task_id, "skip", |task| {
            task.skipped_at = Some(now);
            task.completed_at = None;
        })
    }

    /// Makes a completed or skipped task active again.
    pub fn reopen(&self, task_id: TaskId) -> AppResult<Guarded<StatusUndo>> {
        self.change_status(task_id, "reopen", |task| {
            task.completed_at = None;
            task.skipped_at = None;
        })
    }

    /// Puts the status timestamps captured by a previous status change back.
    pub fn restore_status(&self, undo: &StatusUndo) -> AppResult<Guarded<Task>> {
        let restored = undo.clone();
        let outcome = self.apply_status(undo.task_id, move |task| {
            task.completed_at = restored.completed_at;
            task.skipped_at = restored.skipped_at;
            task.next_due_at = restored.next_due_at;
        })?;
        if outcome.is_ok() {
            tracing::info!(task_id = undo.task_id, "task status restored");
            self.emit(GraphChange::Upserted(vec![undo.task_id]));
        }
        Ok(outcome.map(|(task, _)| task))
    }

    /// Reopens recurring tasks whose next due time has passed. Tasks whose
    /// reactivation would close a cycle stay completed.
    pub fn reactivate_due(&self, now: DateTime<Utc>) -> AppResult<Vec<TaskId>> {
        let reopened = self.db.write(|tx| {
            let mut index = GraphIndex::load(tx)?;
            let mut reopened = Vec::new();
            for mut task in db::tasks::list_tasks(tx, false)? {
                let due = task.completed_at.is_some()
                    && task.recurrence_days.is_some()
                    && task.next_due_at.map(|at| at <= now).unwrap_or(false);
                if !due {
                    continue;
                }
                if index.reactivation_would_cycle(task.id) {
                    tracing::warn!(
                        task_id = task.id,
                        "recurring task left completed; reopening would close a cycle"
                    );
                    continue;
                }
                task.completed_at = None;
                task.next_due_at = None;
                task.updated_at = now;
                db::tasks::update_task(tx, &task)?;
                index.add_task(task.id, true);
                reopened.push(task.id);
            }
            Ok(reopened)
        })?;

        if !reopened.is_empty() {
            tracing::info!(count = reopened.len(), "recurring tasks reopened");
            self.emit(GraphChange::Upserted(reopened.clone()));
        }
        Ok(reopened)
    }

    pub fn leaves(&self) -> AppResult<Vec<TaskId>> {
        Ok(self.index()?.leaves())
    }

    pub fn roots(&self) -> AppResult<Vec<TaskId>> {
        Ok(self.index()?.roots())
    }

    pub fn blocked(&self, task_ids: &[TaskId]) -> AppResult<Vec<TaskId>> {
        Ok(self.index()?.blocked(task_ids))
    }

    pub fn children_of(&self, task_id: TaskId) -> AppResult<Vec<Task>> {
        let ids = self.db.read(|conn| db::edges::child_ids(conn, task_id))?;
        self.tasks_by_ids(&ids)
    }

    pub fn parents_of(&self, task_id: TaskId) -> AppResult<Vec<Task>> {
        let ids = self.db.read(|conn| db::edges::parent_ids(conn, task_id))?;
        self.tasks_by_ids(&ids)
    }

    pub fn dependencies_of(&self, task_id: TaskId) -> AppResult<Vec<Task>> {
        let ids = self.db.read(|conn| db::edges::depends_on_ids(conn, task_id))?;
        self.tasks_by_ids(&ids)
    }

    /// Root-first breadcrumb ending at the task's immediate parent.
    pub fn ancestor_path(&self, task_id: TaskId) -> AppResult<Vec<Task>> {
        self.db.read(|conn| {
            let path = GraphIndex::load(conn)?.ancestor_path(task_id);
            db::tasks::list_tasks_by_ids(conn, &path)
        })
    }

    /// Consistent point-in-time index of the whole graph.
    pub fn index(&self) -> AppResult<GraphIndex> {
        self.db.read(GraphIndex::load)
    }

    fn modify(
        &self,
        task_id: TaskId,
        operation: &'static str,
        apply: impl FnOnce(&mut Task),
    ) -> AppResult<Guarded<Task>> {
        let outcome = self.db.write_guarded(|tx| {
            let Some(mut task) = db::tasks::get_task(tx, task_id)? else {
                return Ok(Err(Rejection::TaskMissing(task_id)));
            };
            apply(&mut task);
            task.updated_at = Utc::now();
            db::tasks::update_task(tx, &task)?;
            Ok(Ok(task))
        })?;

        if outcome.is_ok() {
            tracing::info!(task_id, operation, "task updated");
            self.emit(GraphChange::Upserted(vec![task_id]));
        }
        Ok(outcome)
    }

    fn change_status(
        &self,
        task_id: TaskId,
        operation: &'static str,
        apply: impl FnOnce(&mut Task),
    ) -> AppResult<Guarded<StatusUndo>> {
        let outcome = self.apply_status(task_id, apply)?;
        if outcome.is_ok() {
            tracing::info!(task_id, operation, "task status changed");
            self.emit(GraphChange::Upserted(vec![task_id]));
        }
        Ok(outcome.map(|(_, undo)| undo))
    }

    /// Applies a status edit, refusing it when it would turn an inactive task
    /// active on a cycle.
    fn apply_status(
        &self,
        task_id: TaskId,
        apply: impl FnOnce(&mut Task),
    ) -> AppResult<Guarded<(Task, StatusUndo)>> {
        self.db.write_guarded(|tx| {
            let Some(mut task) = db::tasks::get_task(tx, task_id)? else {
                return Ok(Err(Rejection::TaskMissing(task_id)));
            };
            let undo = StatusUndo {
                task_id,
                completed_at: task.completed_at,
                skipped_at: task.skipped_at,
                next_due_at: task.next_due_at,
            };
            let was_active = task.is_active();
            apply(&mut task);
            if !was_active
                && task.is_active()
                && GraphIndex::load(tx)?.reactivation_would_cycle(task_id)
            {
                return Ok(Err(Rejection::WouldCreateCycle));
            }
            task.updated_at = Utc::now();
            db::tasks::update_task(tx, &task)?;
            Ok(Ok((task, undo)))
        })
    }
}

/// Validates `payload` and inserts the task, plus its parent link, on `conn`.
/// The caller owns the transaction and announces the task after commit.
pub(crate) fn insert_new_task(
    conn: &Connection,
    payload: &CreateTaskPayload,
) -> AppResult<Guarded<Task>> {
    let name = normalize_name(&payload.name)?;
    let link = normalize_link(payload.link.as_deref())?;
    let recurrence_days = check_recurrence(payload.recurrence_days)?;
    if let Some(parent_id) = payload.parent_id {
        if !db::tasks::task_exists(conn, parent_id)? {
            return Ok(Err(Rejection::TaskMissing(parent_id)));
        }
    }
    let now = Utc::now();
    let mut task = Task {
        id: 0,
        sync_id: Uuid::new_v4().to_string(),
        name,
        created_at: now,
        updated_at: now,
        completed_at: None,
        started_at: None,
        skipped_at: None,
        last_worked_at: None,
        priority: payload.priority.unwrap_or_default(),
        difficulty: payload.difficulty.unwrap_or_default(),
        link,
        recurrence_days,
        next_due_at: None,
    };
    task.id = db::tasks::insert_task(conn, &task)?;
    if let Some(parent_id) = payload.parent_id {
        db::edges::insert_link(
            conn,
            HierarchyEdge {
                parent_id,
                child_id: task.id,
            },
        )?;
    }
    Ok(Ok(task))
}
