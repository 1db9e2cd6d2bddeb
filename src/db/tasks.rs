use super::{conversion_error, parse_optional_time, parse_time};
use crate::errors::AppResult;
use crate::models::{Difficulty, Priority, Task, TaskId};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

const TASK_COLUMNS: &str = "id, sync_id, name, created_at, updated_at, completed_at, started_at,
     skipped_at, last_worked_at, priority, difficulty, link, recurrence_days, next_due_at";

/// Inserts `task`. A non-positive id lets SQLite allocate one; any other id is
/// written as given (used when restoring deleted tasks).
pub fn insert_task(conn: &Connection, task: &Task) -> AppResult<TaskId> {
    let id = (task.id > 0).then_some(task.id);
    conn.execute(
        "INSERT INTO tasks (
           id, sync_id, name, created_at, updated_at, completed_at, started_at, skipped_at,
           last_worked_at, priority, difficulty, link, recurrence_days, next_due_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            id,
            task.sync_id,
            task.name,
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
            task.completed_at.map(|at| at.to_rfc3339()),
            task.started_at.map(|at| at.to_rfc3339()),
            task.skipped_at.map(|at| at.to_rfc3339()),
            task.last_worked_at.map(|at| at.to_rfc3339()),
            task.priority.as_str(),
            task.difficulty.as_str(),
            task.link,
            task.recurrence_days,
            task.next_due_at.map(|at| at.to_rfc3339()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes every mutable column of `task` back to its row.
pub fn update_task(conn: &Connection, task: &Task) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET
           name = ?1, updated_at = ?2, completed_at = ?3, started_at = ?4, skipped_at = ?5,
           last_worked_at = ?6, priority = ?7, difficulty = ?8, link = ?9, recurrence_days = ?10,
           next_due_at = ?11
         WHERE id = ?12",
        params![
            task.name,
            task.updated_at.to_rfc3339(),
            task.completed_at.map(|at| at.to_rfc3339()),
            task.started_at.map(|at| at.to_rfc3339()),
            task.skipped_at.map(|at| at.to_rfc3339()),
            task.last_worked_at.map(|at| at.to_rfc3339()),
            task.priority.as_str(),
            task.difficulty.as_str(),
            task.link,
            task.recurrence_days,
            task.next_due_at.map(|at| at.to_rfc3339()),
            task.id,
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_task(conn: &Connection, task_id: TaskId) -> AppResult<bool> {
    let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
    Ok(changed > 0)
}

pub fn get_task(conn: &Connection, task_id: TaskId) -> AppResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    Ok(conn.query_row(&sql, [task_id], parse_task_row).optional()?)
}

pub fn get_task_by_sync_id(conn: &Connection, sync_id: &str) -> AppResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE sync_id = ?1", TASK_COLUMNS);
    Ok(conn.query_row(&sql, [sync_id], parse_task_row).optional()?)
}

pub fn task_exists(conn: &Connection, task_id: TaskId) -> AppResult<bool> {
    let count: i64 =
        conn.query_row("SELECT COUNT(1) FROM tasks WHERE id = ?1", [task_id], |row| {
            row.get(0)
        })?;
    Ok(count > 0)
}

/// All tasks in creation order.
pub fn list_tasks(conn: &Connection, active_only: bool) -> AppResult<Vec<Task>> {
    let mut sql = format!("SELECT {} FROM tasks", TASK_COLUMNS);
    if active_only {
        sql.push_str(" WHERE completed_at IS NULL AND skipped_at IS NULL");
    }
    sql.push_str(" ORDER BY created_at ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], parse_task_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

pub fn list_tasks_by_ids(conn: &Connection, ids: &[TaskId]) -> AppResult<Vec<Task>> {
    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = get_task(conn, *id)? {
            result.push(task);
        }
    }
    Ok(result)
}

pub fn all_ids(conn: &Connection) -> AppResult<HashSet<TaskId>> {
    let mut stmt = conn.prepare("SELECT id FROM tasks")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, TaskId>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub fn active_ids(conn: &Connection) -> AppResult<HashSet<TaskId>> {
    let mut stmt =
        conn.prepare("SELECT id FROM tasks WHERE completed_at IS NULL AND skipped_at IS NULL")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, TaskId>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        sync_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
        updated_at: parse_time(&row.get::<_, String>(4)?)?,
        completed_at: parse_optional_time(row.get(5)?)?,
        started_at: parse_optional_time(row.get(6)?)?,
        skipped_at: parse_optional_time(row.get(7)?)?,
        last_worked_at: parse_optional_time(row.get(8)?)?,
        priority: parse_priority(&row.get::<_, String>(9)?)?,
        difficulty: parse_difficulty(&row.get::<_, String>(10)?)?,
        link: row.get(11)?,
        recurrence_days: row.get(12)?,
        next_due_at: parse_optional_time(row.get(13)?)?,
    })
}

fn parse_priority(raw: &str) -> rusqlite::Result<Priority> {
    match raw {
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        other => Err(conversion_error(format!("Unknown priority '{}'", other))),
    }
}

fn parse_difficulty(raw: &str) -> rusqlite::Result<Difficulty> {
    match raw {
        "normal" => Ok(Difficulty::Normal),
        "quick" => Ok(Difficulty::Quick),
        other => Err(conversion_error(format!("Unknown difficulty '{}'", other))),
    }
}
