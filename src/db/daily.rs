use super::{format_day, parse_day};
use crate::errors::AppResult;
use crate::models::{DailySelection, TaskId};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

pub fn get_selection(conn: &Connection, day: NaiveDate) -> AppResult<Option<DailySelection>> {
    let row = conn
        .query_row(
            "SELECT day, task_ids_json, completed_json, worked_json, pinned_json
             FROM daily_selections WHERE day = ?1",
            [format_day(day)],
            raw_selection_row,
        )
        .optional()?;
    row.map(decode_selection).transpose()
}

/// Replaces the record for `selection.day`.
pub fn save_selection(conn: &Connection, selection: &DailySelection) -> AppResult<()> {
    conn.execute(
        "INSERT INTO daily_selections
           (day, task_ids_json, completed_json, worked_json, pinned_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(day) DO UPDATE SET
           task_ids_json = excluded.task_ids_json,
           completed_json = excluded.completed_json,
           worked_json = excluded.worked_json,
           pinned_json = excluded.pinned_json,
           updated_at = excluded.updated_at",
        params![
            format_day(selection.day),
            serde_json::to_string(&selection.task_ids)?,
            serde_json::to_string(&selection.completed)?,
            serde_json::to_string(&selection.worked)?,
            serde_json::to_string(&selection.pinned)?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Most recent records strictly before `day`, newest first.
pub fn recent_selections(
    conn: &Connection,
    day: NaiveDate,
    limit: u32,
) -> AppResult<Vec<DailySelection>> {
    let mut stmt = conn.prepare(
        "SELECT day, task_ids_json, completed_json, worked_json, pinned_json
         FROM daily_selections WHERE day < ?1 ORDER BY day DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![format_day(day), limit], raw_selection_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_selection).collect()
}

type RawSelection = (NaiveDate, String, String, String, String);

fn raw_selection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSelection> {
    Ok((
        parse_day(&row.get::<_, String>(0)?)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_selection(raw: RawSelection) -> AppResult<DailySelection> {
    let (day, task_ids, completed, worked, pinned) = raw;
    Ok(DailySelection {
        day,
        task_ids: serde_json::from_str::<Vec<TaskId>>(&task_ids)?,
        completed: serde_json::from_str::<BTreeSet<TaskId>>(&completed)?,
        worked: serde_json::from_str::<BTreeSet<TaskId>>(&worked)?,
        pinned: serde_json::from_str::<BTreeSet<TaskId>>(&pinned)?,
    })
}

#[cfg(test)]
mod tests {
    use super::{get_selection, recent_selections, save_selection};
    use crate::db::Database;
    use crate::models::DailySelection;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).expect("valid date")
    }

    #[test]
    fn selection_round_trips_and_is_keyed_by_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("daily.db")).expect("db");

        let mut selection = DailySelection::empty(day(4));
        selection.task_ids = vec![3, 1, 2];
        selection.pinned.insert(1);
        selection.completed.insert(2);
        db.write(|tx| save_selection(tx, &selection)).expect("save");

        let loaded = db
            .read(|conn| get_selection(conn, day(4)))
            .expect("read")
            .expect("exists");
        assert_eq!(loaded, selection);
        assert!(db.read(|conn| get_selection(conn, day(5))).expect("read").is_none());
    }

    #[test]
    fn recent_selections_exclude_the_requested_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("recent.db")).expect("db");
        for d in 1..=5 {
            let mut selection = DailySelection::empty(day(d));
            selection.task_ids = vec![i64::from(d)];
            db.write(|tx| save_selection(tx, &selection)).expect("save");
        }

        let recent = db.read(|conn| recent_selections(conn, day(4), 2)).expect("recent");
        let days = recent.iter().map(|s| s.day).collect::<Vec<_>>();
        assert_eq!(days, vec![day(3), day(2)]);
    }
}
