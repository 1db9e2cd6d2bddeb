//! Slot reconciliation for the daily set.
//!
//! Every function takes a snapshot by reference and returns a new one; the
//! caller persists the result. Protected entries (pinned or completed) are
//! never evicted.

use crate::errors::{Guarded, Rejection};
use crate::models::{DailySelection, TaskId};
use std::collections::{BTreeSet, HashSet};

pub const MAX_PINNED: usize = 5;
pub const MAX_SLOTS: usize = 10;
pub const TARGET_SLOTS: usize = 5;

/// Pins `task_id` if it is unpinned, unpins it otherwise.
pub fn toggle_pin(selection: &DailySelection, task_id: TaskId) -> Guarded<DailySelection> {
    if selection.pinned.contains(&task_id) {
        let mut next = selection.clone();
        next.pinned.remove(&task_id);
        if !next.completed.contains(&task_id) {
            next.task_ids = trim_excess(&next.task_ids, &next.completed, &next.pinned);
        }
        return Ok(next);
    }
    pin(selection, task_id)
}

/// Pins a task that should join the daily set right away. Pinning an already
/// pinned task is a no-op.
pub fn pin_new_task(selection: &DailySelection, task_id: TaskId) -> Guarded<DailySelection> {
    if selection.pinned.contains(&task_id) {
        return Ok(selection.clone());
    }
    pin(selection, task_id)
}

fn pin(selection: &DailySelection, task_id: TaskId) -> Guarded<DailySelection> {
    if selection.pinned.len() >= MAX_PINNED {
        return Err(Rejection::PinCapacity);
    }
    let mut next = selection.clone();
    if !next.contains(task_id) {
        match replaceable_slot(&next) {
            Some(position) => next.task_ids[position] = task_id,
            None if next.task_ids.len() < MAX_SLOTS => next.task_ids.push(task_id),
            None => return Err(Rejection::SlotCapacity),
        }
    }
    next.pinned.insert(task_id);
    Ok(next)
}

/// Whether a task from outside the daily set could be pinned right now.
pub fn check_pin_capacity(selection: &DailySelection) -> Guarded<()> {
    if selection.pinned.len() >= MAX_PINNED {
        Err(Rejection::PinCapacity)
    } else if replaceable_slot(selection).is_none() && selection.task_ids.len() >= MAX_SLOTS {
        Err(Rejection::SlotCapacity)
    } else {
        Ok(())
    }
}

/// Last position holding neither a pinned nor a completed task.
fn replaceable_slot(selection: &DailySelection) -> Option<usize> {
    selection
        .task_ids
        .iter()
        .rposition(|id| !selection.is_protected(*id))
}

/// Drops unprotected entries from the end until `TARGET_SLOTS` remain. The
/// result can stay longer when too many entries are protected.
pub fn trim_excess(
    task_ids: &[TaskId],
    completed: &BTreeSet<TaskId>,
    pinned: &BTreeSet<TaskId>,
) -> Vec<TaskId> {
    let mut kept = task_ids.to_vec();
    let mut position = kept.len();
    while kept.len() > TARGET_SLOTS && position > 0 {
        position -= 1;
        let id = kept[position];
        if !completed.contains(&id) && !pinned.contains(&id) {
            kept.remove(position);
        }
    }
    kept
}

/// Replaces an unprotected entry with a task from outside the daily set.
pub fn swap_slot(
    selection: &DailySelection,
    old_id: TaskId,
    new_id: TaskId,
) -> Guarded<DailySelection> {
    let Some(position) = selection.task_ids.iter().position(|id| *id == old_id) else {
        return Err(Rejection::NotInDailySet(old_id));
    };
    if selection.is_protected(old_id) {
        return Err(Rejection::ProtectedSlot);
    }
    if selection.contains(new_id) {
        return Err(Rejection::AlreadyInDailySet(new_id));
    }
    let mut next = selection.clone();
    next.task_ids[position] = new_id;
    next.worked.remove(&old_id);
    Ok(next)
}

/// Keeps protected entries in place and fills up to `TARGET_SLOTS` from
/// `drawn`, skipping anything already kept.
pub fn apply_refresh(selection: &DailySelection, drawn: &[TaskId]) -> DailySelection {
    let mut next = selection.clone();
    next.task_ids = selection
        .task_ids
        .iter()
        .copied()
        .filter(|id| selection.is_protected(*id))
        .collect();
    for id in drawn {
        if next.task_ids.len() >= TARGET_SLOTS {
            break;
        }
        if !next.task_ids.contains(id) {
            next.task_ids.push(*id);
        }
    }
    let kept = next.task_ids.iter().copied().collect::<HashSet<_>>();
    next.worked.retain(|id| kept.contains(id));
    next
}

pub fn mark_completed(selection: &DailySelection, task_id: TaskId) -> DailySelection {
    let mut next = selection.clone();
    if next.contains(task_id) {
        next.completed.insert(task_id);
        next.task_ids = trim_excess(&next.task_ids, &next.completed, &next.pinned);
    }
    next
}

/// Reverses `mark_completed`; the entry becomes evictable again.
pub fn unmark_completed(selection: &DailySelection, task_id: TaskId) -> DailySelection {
    let mut next = selection.clone();
    if next.completed.remove(&task_id) {
        next.task_ids = trim_excess(&next.task_ids, &next.completed, &next.pinned);
    }
    next
}

pub fn mark_worked(selection: &DailySelection, task_id: TaskId) -> DailySelection {
    let mut next = selection.clone();
    if next.contains(task_id) {
        next.worked.insert(task_id);
    }
    next
}

/// Drops identities of tasks that no longer exist.
pub fn retain_existing(selection: &DailySelection, existing: &HashSet<TaskId>) -> DailySelection {
    let mut next = selection.clone();
    next.task_ids.retain(|id| existing.contains(id));
    next.completed.retain(|id| existing.contains(id));
    next.worked.retain(|id| existing.contains(id));
    next.pinned.retain(|id| existing.contains(id));
    next
}
