use super::{GraphChange, GraphIndex, GraphStore, Relation};
use crate::db;
use crate::errors::{AppResult, Guarded, Rejection};
use crate::models::{
    DeleteUndo, DependencyEdge, HierarchyEdge, RemovedTask, SyncRecord, Task, TaskId,
};
use chrono::Utc;
use rusqlite::Connection;

impl GraphStore {
    /// Removes the task and every edge touching it.
    pub fn delete_only(&self, task_id: TaskId) -> AppResult<Guarded<DeleteUndo>> {
        let outcome = self.db.write_guarded(|tx| {
            let Some(removed) = capture_removal(tx, task_id)? else {
                return Ok(Err(Rejection::TaskMissing(task_id)));
            };
            db::edges::detach_task(tx, task_id)?;
            db::tasks::delete_task(tx, task_id)?;
            Ok(Ok(DeleteUndo::Single(removed)))
        })?;
        self.after_delete("delete-only", &outcome);
        Ok(outcome)
    }

    /// Removes the task after linking each former parent straight to each
    /// former child. Only links that did not already exist are reported, so the
    /// undo removes exactly what this call added.
    pub fn delete_and_reparent(&self, task_id: TaskId) -> AppResult<Guarded<DeleteUndo>> {
        let outcome = self.db.write_guarded(|tx| remove_with_reparent(tx, task_id))?;
        self.after_delete("delete-and-reparent", &outcome);
        Ok(outcome)
    }

    /// Removes the task, its whole hierarchy closure, and every edge touching
    /// any removed task.
    pub fn delete_subtree(&self, task_id: TaskId) -> AppResult<Guarded<DeleteUndo>> {
        let outcome = self.db.write_guarded(|tx| {
            let index = GraphIndex::load(tx)?;
            if !index.contains(task_id) {
                return Ok(Err(Rejection::TaskMissing(task_id)));
            }
            let closure = index.subtree(task_id);
            let ids = closure.iter().copied().collect::<Vec<_>>();
            let tasks = db::tasks::list_tasks_by_ids(tx, &ids)?;

            let links = db::edges::load_links(tx)?
                .into_iter()
                .filter(|edge| {
                    closure.contains(&edge.parent_id) || closure.contains(&edge.child_id)
                })
                .collect::<Vec<_>>();
            let dependencies = db::edges::load_dependencies(tx)?
                .into_iter()
                .filter(|edge| {
                    closure.contains(&edge.task_id) || closure.contains(&edge.depends_on_id)
                })
                .collect::<Vec<_>>();

            for edge in &links {
                db::edges::delete_link(tx, *edge)?;
            }
            for edge in &dependencies {
                db::edges::delete_dependency(tx, *edge)?;
            }
            for id in &ids {
                db::tasks::delete_task(tx, *id)?;
            }

            Ok(Ok(DeleteUndo::Subtree {
                tasks,
                links,
                dependencies,
            }))
        })?;
        self.after_delete("delete-subtree", &outcome);
        Ok(outcome)
    }

    /// Reverses any delete mode. Tasks come back with their original identity.
    /// Edges whose other endpoint has since disappeared are skipped; an edge
    /// that would now close a cycle rejects the whole restore.
    pub fn restore_deleted(&self, undo: &DeleteUndo) -> AppResult<Guarded<Vec<TaskId>>> {
        let outcome = self.db.write_guarded(|tx| match undo {
            DeleteUndo::Single(removed) => restore_removed(tx, removed),
            DeleteUndo::Reparented {
                removed,
                created_links,
            } => {
                for edge in created_links {
                    db::edges::delete_link(tx, *edge)?;
                }
                restore_removed(tx, removed)
            }
            DeleteUndo::Subtree {
                tasks,
                links,
                dependencies,
            } => restore_subtree(tx, tasks, links, dependencies),
        })?;

        match &outcome {
            Ok(ids) => {
                tracing::info!(count = ids.len(), "deleted tasks restored");
                self.emit(GraphChange::Upserted(ids.clone()));
            }
            Err(rejection) => tracing::debug!(%rejection, "restore rejected"),
        }
        Ok(outcome)
    }

    fn after_delete(&self, mode: &'static str, outcome: &Guarded<DeleteUndo>) {
        match outcome {
            Ok(undo) => {
                let removed = undo.removed_ids();
                tracing::info!(mode, count = removed.len(), task_ids = ?removed, "tasks deleted");
                let now = Utc::now();
                let tombstones = removed_tasks(undo)
                    .map(|task| SyncRecord::tombstone(task, now))
                    .collect::<Vec<_>>();
                self.emit(GraphChange::Deleted(tombstones));
            }
            Err(rejection) => tracing::debug!(mode, %rejection, "delete rejected"),
        }
    }
}

/// Reparenting delete on a caller-owned transaction. Makes no change when the
/// task is missing.
pub(super) fn remove_with_reparent(
    conn: &Connection,
    task_id: TaskId,
) -> AppResult<Guarded<DeleteUndo>> {
    let Some(removed) = capture_removal(conn, task_id)? else {
        return Ok(Err(Rejection::TaskMissing(task_id)));
    };

    let mut index = GraphIndex::load(conn)?;
    for parent_id in &removed.parent_ids {
        index.remove(Relation::Hierarchy, *parent_id, task_id);
    }
    for child_id in &removed.child_ids {
        index.remove(Relation::Hierarchy, task_id, *child_id);
    }

    let mut created_links = Vec::new();
    for parent_id in &removed.parent_ids {
        for child_id in &removed.child_ids {
            let edge = HierarchyEdge {
                parent_id: *parent_id,
                child_id: *child_id,
            };
            if index.has_edge(Relation::Hierarchy, edge.parent_id, edge.child_id) {
                continue;
            }
            if index.would_cycle(Relation::Hierarchy, edge.parent_id, edge.child_id) {
                tracing::warn!(
                    parent_id = edge.parent_id,
                    child_id = edge.child_id,
                    "reparent link skipped; it would close a cycle"
                );
                continue;
            }
            db::edges::insert_link(conn, edge)?;
            index.insert(Relation::Hierarchy, edge.parent_id, edge.child_id);
            created_links.push(edge);
        }
    }

    db::edges::detach_task(conn, task_id)?;
    db::tasks::delete_task(conn, task_id)?;
    Ok(Ok(DeleteUndo::Reparented {
        removed,
        created_links,
    }))
}

fn removed_tasks(undo: &DeleteUndo) -> Box<dyn Iterator<Item = &Task> + '_> {
    match undo {
        DeleteUndo::Single(removed) | DeleteUndo::Reparented { removed, .. } => {
            Box::new(std::iter::once(&removed.task))
        }
        DeleteUndo::Subtree { tasks, .. } => Box::new(tasks.iter()),
    }
}

fn capture_removal(conn: &Connection, task_id: TaskId) -> AppResult<Option<RemovedTask>> {
    let Some(task) = db::tasks::get_task(conn, task_id)? else {
        return Ok(None);
    };
    Ok(Some(RemovedTask {
        task,
        parent_ids: db::edges::parent_ids(conn, task_id)?,
        child_ids: db::edges::child_ids(conn, task_id)?,
        depends_on_ids: db::edges::depends_on_ids(conn, task_id)?,
        dependent_ids: db::edges::dependent_ids(conn, task_id)?,
    }))
}

fn check_identity_free(conn: &Connection, task: &Task) -> AppResult<Guarded<()>> {
    if db::tasks::task_exists(conn, task.id)?
        || db::tasks::get_task_by_sync_id(conn, &task.sync_id)?.is_some()
    {
        return Ok(Err(Rejection::IdentityConflict(task.id)));
    }
    Ok(Ok(()))
}

fn restore_removed(conn: &Connection, removed: &RemovedTask) -> AppResult<Guarded<Vec<TaskId>>> {
    let task_id = removed.task.id;
    if let Err(rejection) = check_identity_free(conn, &removed.task)? {
        return Ok(Err(rejection));
    }
    db::tasks::insert_task(conn, &removed.task)?;

    let links = removed
        .parent_ids
        .iter()
        .map(|parent_id| (*parent_id, task_id))
        .chain(removed.child_ids.iter().map(|child_id| (task_id, *child_id)));
    let dependencies = removed
        .depends_on_ids
        .iter()
        .map(|depends_on_id| (task_id, *depends_on_id))
        .chain(removed.dependent_ids.iter().map(|dependent_id| (*dependent_id, task_id)));

    let mut index = GraphIndex::load(conn)?;
    for (from, to) in links {
        if let Err(rejection) = restore_edge(conn, &mut index, Relation::Hierarchy, from, to)? {
            return Ok(Err(rejection));
        }
    }
    for (from, to) in dependencies {
        if let Err(rejection) = restore_edge(conn, &mut index, Relation::Dependency, from, to)? {
            return Ok(Err(rejection));
        }
    }
    Ok(Ok(vec![task_id]))
}

fn restore_subtree(
    conn: &Connection,
    tasks: &[Task],
    links: &[HierarchyEdge],
    dependencies: &[DependencyEdge],
) -> AppResult<Guarded<Vec<TaskId>>> {
    for task in tasks {
        if let Err(rejection) = check_identity_free(conn, task)? {
            return Ok(Err(rejection));
        }
    }
    for task in tasks {
        db::tasks::insert_task(conn, task)?;
    }

    let mut index = GraphIndex::load(conn)?;
    for edge in links {
        if let Err(rejection) =
            restore_edge(conn, &mut index, Relation::Hierarchy, edge.parent_id, edge.child_id)?
        {
            return Ok(Err(rejection));
        }
    }
    for edge in dependencies {
        if let Err(rejection) =
            restore_edge(conn, &mut index, Relation::Dependency, edge.task_id, edge.depends_on_id)?
        {
            return Ok(Err(rejection));
        }
    }
    Ok(Ok(tasks.iter().map(|task| task.id).collect()))
}

fn restore_edge(
    conn: &Connection,
    index: &mut GraphIndex,
    relation: Relation,
    from: TaskId,
    to: TaskId,
) -> AppResult<Guarded<()>> {
    if !index.contains(from) || !index.contains(to) {
        tracing::warn!(?relation, from, to, "edge not restored; endpoint no longer exists");
        return Ok(Ok(()));
    }
    if index.has_edge(relation, from, to) {
        return Ok(Ok(()));
    }
    if index.would_cycle(relation, from, to) {
        return Ok(Err(Rejection::WouldCreateCycle));
    }
    match relation {
        Relation::Hierarchy => db::edges::insert_link(
            conn,
            HierarchyEdge {
                parent_id: from,
                child_id: to,
            },
        )?,
        Relation::Dependency => db::edges::insert_dependency(
            conn,
            DependencyEdge {
                task_id: from,
                depends_on_id: to,
            },
        )?,
    };
    index.insert(relation, from, to);
    Ok(Ok(()))
}
