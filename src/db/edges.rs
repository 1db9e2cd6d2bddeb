use crate::errors::AppResult;
use crate::models::{DependencyEdge, HierarchyEdge, TaskId};
use chrono::Utc;
use rusqlite::{params, Connection};

pub fn load_links(conn: &Connection) -> AppResult<Vec<HierarchyEdge>> {
    let mut stmt = conn.prepare(
        "SELECT parent_id, child_id FROM task_links
         ORDER BY parent_id, child_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(HierarchyEdge {
                parent_id: row.get(0)?,
                child_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_dependencies(conn: &Connection) -> AppResult<Vec<DependencyEdge>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, depends_on_id FROM task_dependencies
         ORDER BY task_id, depends_on_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DependencyEdge {
                task_id: row.get(0)?,
                depends_on_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns false when the edge was already present.
pub fn insert_link(conn: &Connection, edge: HierarchyEdge) -> AppResult<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO task_links (parent_id, child_id, created_at) VALUES (?1, ?2, ?3)",
        params![edge.parent_id, edge.child_id, Utc::now().to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub fn delete_link(conn: &Connection, edge: HierarchyEdge) -> AppResult<bool> {
    let changed = conn.execute(
        "DELETE FROM task_links WHERE parent_id = ?1 AND child_id = ?2",
        params![edge.parent_id, edge.child_id],
    )?;
    Ok(changed > 0)
}

pub fn insert_dependency(conn: &Connection, edge: DependencyEdge) -> AppResult<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![edge.task_id, edge.depends_on_id, Utc::now().to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub fn delete_dependency(conn: &Connection, edge: DependencyEdge) -> AppResult<bool> {
    let changed = conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on_id = ?2",
        params![edge.task_id, edge.depends_on_id],
    )?;
    Ok(changed > 0)
}

/// Removes every hierarchy and dependency edge touching `task_id`.
pub fn detach_task(conn: &Connection, task_id: TaskId) -> AppResult<usize> {
    let links = conn.execute(
        "DELETE FROM task_links WHERE parent_id = ?1 OR child_id = ?1",
        [task_id],
    )?;
    let dependencies = conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 OR depends_on_id = ?1",
        [task_id],
    )?;
    Ok(links + dependencies)
}

fn id_column(conn: &Connection, sql: &str, task_id: TaskId) -> AppResult<Vec<TaskId>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([task_id], |row| row.get::<_, TaskId>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn parent_ids(conn: &Connection, task_id: TaskId) -> AppResult<Vec<TaskId>> {
    id_column(
        conn,
        "SELECT parent_id FROM task_links WHERE child_id = ?1 ORDER BY parent_id",
        task_id,
    )
}

pub fn child_ids(conn: &Connection, task_id: TaskId) -> AppResult<Vec<TaskId>> {
    id_column(
        conn,
        "SELECT child_id FROM task_links WHERE parent_id = ?1 ORDER BY child_id",
        task_id,
    )
}

pub fn depends_on_ids(conn: &Connection, task_id: TaskId) -> AppResult<Vec<TaskId>> {
    id_column(
        conn,
        "SELECT depends_on_id FROM task_dependencies WHERE task_id = ?1 ORDER BY depends_on_id",
        task_id,
    )
}

pub fn dependent_ids(conn: &Connection, task_id: TaskId) -> AppResult<Vec<TaskId>> {
    id_column(
        conn,
        "SELECT task_id FROM task_dependencies WHERE depends_on_id = ?1 ORDER BY task_id",
        task_id,
    )
}
