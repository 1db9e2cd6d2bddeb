use super::delete::remove_with_reparent;
use super::{GraphIndex, GraphStore};
use crate::db;
use crate::errors::{AppResult, Guarded, Rejection};
use crate::models::{MergePolicy, PullSummary, SyncRecord, SyncStatus, Task, TaskId};
use crate::validation::{check_recurrence, normalize_link, normalize_name};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "taskId", rename_all = "kebab-case")]
pub enum UpsertOutcome {
    Inserted(TaskId),
    Updated(TaskId),
    Unchanged(TaskId),
    /// A tombstone arrived for a task this store has never seen.
    Ignored,
}

/// Result of applying a pull. `push_back` lists local tasks the remote should
/// receive: ones newer than their pulled copy, ones whose pulled copy was
/// refused, and every active task when local data replaces the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMerge {
    pub summary: PullSummary,
    pub push_back: Vec<TaskId>,
}

impl RemoteMerge {
    fn record_upsert(
        &mut self,
        sync_id: &str,
        local_id: Option<TaskId>,
        outcome: Guarded<UpsertOutcome>,
    ) {
        match outcome {
            Ok(UpsertOutcome::Inserted(_)) => self.summary.inserted += 1,
            Ok(UpsertOutcome::Updated(_)) => self.summary.updated += 1,
            Ok(UpsertOutcome::Unchanged(_) | UpsertOutcome::Ignored) => self.summary.unchanged += 1,
            Err(rejection) => {
                tracing::warn!(sync_id, %rejection, "pulled record not applied");
                self.summary.rejected += 1;
                self.push_back.extend(local_id);
            }
        }
    }

    fn record_delete(&mut self, task_id: TaskId, outcome: Guarded<()>) {
        match outcome {
            Ok(()) => self.summary.deleted += 1,
            Err(rejection) => {
                tracing::warn!(task_id, %rejection, "remote deletion not applied");
                self.summary.unchanged += 1;
            }
        }
    }
}

impl GraphStore {
    /// Applies one remote record, matched on its sync identity. Does not notify
    /// the change listener, so pulled records are not echoed back on push.
    /// Tombstones are not applied here; the caller decides how to delete.
    pub fn upsert_by_sync_id(&self, record: &SyncRecord) -> AppResult<Guarded<UpsertOutcome>> {
        let incoming = incoming_task(record)?;
        let outcome = self.db.write_guarded(|tx| {
            let existing = db::tasks::get_task_by_sync_id(tx, &record.sync_id)?;
            match incoming {
                Some(incoming) => upsert_task(tx, existing, incoming),
                None => Ok(Ok(existing
                    .map(|task| UpsertOutcome::Unchanged(task.id))
                    .unwrap_or(UpsertOutcome::Ignored))),
            }
        })?;

        tracing::debug!(sync_id = %record.sync_id, ?outcome, "remote record applied");
        Ok(outcome)
    }

    /// Merges a pulled batch in one transaction. Every record is validated
    /// before anything is written, so a malformed record fails the whole pull
    /// with nothing applied. Remote deletions re-home children rather than
    /// dropping them. Nothing applied here reaches the change listener.
    pub fn merge_remote(
        &self,
        records: &[SyncRecord],
        policy: MergePolicy,
    ) -> AppResult<RemoteMerge> {
        let prepared = records
            .iter()
            .map(|record| incoming_task(record).map(|incoming| (record, incoming)))
            .collect::<AppResult<Vec<_>>>()?;

        let merge = self.db.write(|tx| {
            let mut merge = RemoteMerge::default();
            match policy {
                MergePolicy::ReplaceRemoteWithLocal => {
                    merge.summary.unchanged = records.len();
                    merge.push_back = db::tasks::list_tasks(tx, true)?
                        .into_iter()
                        .map(|task| task.id)
                        .collect();
                }
                MergePolicy::ReplaceLocalWithRemote => {
                    let remote_ids = prepared
                        .iter()
                        .filter(|(_, incoming)| incoming.is_some())
                        .map(|(record, _)| record.sync_id.as_str())
                        .collect::<HashSet<_>>();
                    for task in db::tasks::list_tasks(tx, false)? {
                        if !remote_ids.contains(task.sync_id.as_str()) {
                            let outcome = remove_with_reparent(tx, task.id)?.map(|_| ());
                            merge.record_delete(task.id, outcome);
                        }
                    }
                    for (record, incoming) in &prepared {
                        let Some(incoming) = incoming else {
                            continue;
                        };
                        let existing = db::tasks::get_task_by_sync_id(tx, &record.sync_id)?;
                        let local_id = existing.as_ref().map(|task| task.id);
                        let outcome = upsert_task(tx, existing, incoming.clone())?;
                        merge.record_upsert(&record.sync_id, local_id, outcome);
                    }
                }
                MergePolicy::Union => {
                    for (record, incoming) in &prepared {
                        merge_newer(tx, record, incoming.as_ref(), &mut merge)?;
                    }
                }
            }
            Ok(merge)
        })?;

        tracing::info!(
            ?policy,
            summary = ?merge.summary,
            push_back = merge.push_back.len(),
            "remote records merged"
        );
        Ok(merge)
    }

    /// Every active task, flattened for the sync collaborator.
    pub fn active_sync_records(&self) -> AppResult<Vec<SyncRecord>> {
        Ok(self
            .list_tasks(true)?
            .iter()
            .map(SyncRecord::from_task)
            .collect())
    }

    pub fn sync_records_for(&self, ids: &[TaskId]) -> AppResult<Vec<SyncRecord>> {
        Ok(self
            .tasks_by_ids(ids)?
            .iter()
            .map(SyncRecord::from_task)
            .collect())
    }

    pub fn task_id_for_sync_id(&self, sync_id: &str) -> AppResult<Option<TaskId>> {
        self.db
            .read(|conn| db::tasks::get_task_by_sync_id(conn, sync_id))
            .map(|task| task.map(|task| task.id))
    }
}

/// Union policy for one record: the side with the newer modification wins,
/// and a tombstone wins ties.
fn merge_newer(
    conn: &Connection,
    record: &SyncRecord,
    incoming: Option<&Task>,
    merge: &mut RemoteMerge,
) -> AppResult<()> {
    let local = db::tasks::get_task_by_sync_id(conn, &record.sync_id)?;
    match (local, incoming) {
        (None, None) => merge.summary.unchanged += 1,
        (None, Some(incoming)) => {
            let outcome = upsert_task(conn, None, incoming.clone())?;
            merge.record_upsert(&record.sync_id, None, outcome);
        }
        (Some(local), None) if record.last_modified >= local.updated_at => {
            let outcome = remove_with_reparent(conn, local.id)?.map(|_| ());
            merge.record_delete(local.id, outcome);
        }
        (Some(local), Some(incoming)) if record.last_modified > local.updated_at => {
            let local_id = local.id;
            let outcome = upsert_task(conn, Some(local), incoming.clone())?;
            merge.record_upsert(&record.sync_id, Some(local_id), outcome);
        }
        (Some(local), _) => {
            merge.summary.unchanged += 1;
            if local.updated_at > record.last_modified {
                merge.push_back.push(local.id);
            }
        }
    }
    Ok(())
}

/// Validated local form of a pulled record, or `None` for a tombstone.
fn incoming_task(record: &SyncRecord) -> AppResult<Option<Task>> {
    if record.status == SyncStatus::Deleted {
        return Ok(None);
    }
    Ok(Some(Task {
        id: 0,
        sync_id: record.sync_id.clone(),
        name: normalize_name(&record.name)?,
        created_at: record.created_at,
        updated_at: record.last_modified,
        completed_at: record.completed_at,
        started_at: record.started_at,
        skipped_at: record.skipped_at,
        last_worked_at: record.last_worked_at,
        priority: record.priority,
        difficulty: record.difficulty,
        link: normalize_link(record.link.as_deref())?,
        recurrence_days: check_recurrence(record.recurrence_days)?,
        next_due_at: record.next_due_at,
    }))
}

/// Writes `incoming` over `existing`. Turning an inactive task active is
/// refused when its edges would then close an active cycle.
fn upsert_task(
    conn: &Connection,
    existing: Option<Task>,
    mut incoming: Task,
) -> AppResult<Guarded<UpsertOutcome>> {
    let Some(current) = existing else {
        incoming.id = db::tasks::insert_task(conn, &incoming)?;
        return Ok(Ok(UpsertOutcome::Inserted(incoming.id)));
    };
    incoming.id = current.id;
    if current == incoming {
        return Ok(Ok(UpsertOutcome::Unchanged(current.id)));
    }
    if !current.is_active()
        && incoming.is_active()
        && GraphIndex::load(conn)?.reactivation_would_cycle(current.id)
    {
        return Ok(Err(Rejection::WouldCreateCycle));
    }
    db::tasks::update_task(conn, &incoming)?;
    Ok(Ok(UpsertOutcome::Updated(current.id)))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{store, task};
    use super::UpsertOutcome;
    use crate::errors::{AppError, Rejection};
    use crate::models::{MergePolicy, SyncRecord, SyncStatus};
    use chrono::Duration;

    #[test]
    fn upsert_inserts_updates_and_detects_no_change() {
        let (_dir, store) = store();
        let id = task(&store, "local");
        let local = store.get_task(id).expect("get").expect("exists");

        let mut record = SyncRecord::from_task(&local);
        assert_eq!(
            store.upsert_by_sync_id(&record).expect("same"),
            Ok(UpsertOutcome::Unchanged(id))
        );

        record.name = "renamed remotely".to_string();
        record.last_modified = record.last_modified + Duration::seconds(5);
        assert_eq!(
            store.upsert_by_sync_id(&record).expect("update"),
            Ok(UpsertOutcome::Updated(id))
        );
        assert_eq!(store.get_task(id).expect("get").expect("exists").name, "renamed remotely");

        record.sync_id = "remote-only".to_string();
        let Ok(UpsertOutcome::Inserted(new_id)) = store.upsert_by_sync_id(&record).expect("insert")
        else {
            panic!("expected insert");
        };
        assert_ne!(new_id, id);
        assert_eq!(store.task_id_for_sync_id("remote-only").expect("lookup"), Some(new_id));
    }

    #[test]
    fn tombstones_for_unknown_tasks_are_ignored() {
        let (_dir, store) = store();
        let id = task(&store, "gone");
        let mut record = SyncRecord::from_task(&store.get_task(id).expect("get").expect("exists"));
        record.sync_id = "never-seen".to_string();
        record.status = SyncStatus::Deleted;
        assert_eq!(store.upsert_by_sync_id(&record).expect("upsert"), Ok(UpsertOutcome::Ignored));
    }

    #[test]
    fn pulled_reactivation_onto_a_cycle_is_refused() {
        let (_dir, store) = store();
        let a = task(&store, "a");
        let b = task(&store, "b");
        store.link(a, b).expect("link").expect("accepted");
        store.complete(a).expect("complete").expect("accepted");
        store.link(b, a).expect("link").expect("accepted");

        let completed = store.get_task(a).expect("get").expect("exists");
        let mut record = SyncRecord::from_task(&completed);
        record.completed_at = None;
        record.status = SyncStatus::Active;
        record.last_modified = completed.updated_at + Duration::seconds(5);

        assert_eq!(
            store.upsert_by_sync_id(&record).expect("upsert"),
            Err(Rejection::WouldCreateCycle)
        );
        assert_eq!(store.get_task(a).expect("get").expect("exists"), completed);
        assert_eq!(store.leaves().expect("leaves"), vec![b]);
        assert_eq!(store.roots().expect("roots"), vec![b]);

        let merge = store.merge_remote(&[record], MergePolicy::Union).expect("merge");
        assert_eq!(merge.summary.rejected, 1);
        assert_eq!(merge.push_back, vec![a]);
        assert!(!store.get_task(a).expect("get").expect("exists").is_active());
    }

    #[test]
    fn malformed_record_fails_the_pull_before_any_write() {
        let (_dir, store) = store();
        let keep = task(&store, "keep");
        let local_only = task(&store, "local only");
        let kept = SyncRecord::from_task(&store.get_task(keep).expect("get").expect("exists"));
        let mut blank = kept.clone();
        blank.sync_id = "blank".to_string();
        blank.name = "   ".to_string();

        for policy in [MergePolicy::ReplaceLocalWithRemote, MergePolicy::Union] {
            let err = store
                .merge_remote(&[kept.clone(), blank.clone()], policy)
                .expect_err("blank name");
            assert!(matches!(err, AppError::Validation(_)));
            assert!(store.get_task(local_only).expect("get").is_some());
            assert_eq!(store.task_id_for_sync_id("blank").expect("lookup"), None);
        }
    }

    #[test]
    fn active_records_skip_completed_tasks() {
        let (_dir, store) = store();
        let open = task(&store, "open");
        let done = task(&store, "done");
        store.complete(done).expect("complete").expect("accepted");

        let records = store.active_sync_records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SyncStatus::Active);
        assert_eq!(
            records[0].sync_id,
            store.get_task(open).expect("get").expect("exists").sync_id
        );
    }
}
