use crate::db::{self, Database};
use crate::errors::{AppResult, Guarded, Rejection};
use crate::graph::{insert_new_task, GraphIndex, GraphStore};
use crate::models::{AppSettings, CreateTaskPayload, DailySelection, StatusUndo, Task, TaskId};
use crate::navigation::NavigationStack;
use crate::selection::{self, SelectionContext};
use crate::slots::{self, TARGET_SLOTS};
use crate::sync::SyncQueue;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;

/// Entry point for the presentation layer. Every call that depends on "today"
/// takes the calendar day explicitly, and every random draw takes the caller's
/// generator.
pub struct PlannerCore {
    db: Arc<Database>,
    graph: GraphStore,
    sync: SyncQueue,
    app_data_dir: PathBuf,
}

impl PlannerCore {
    pub fn new(app_data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let db_path = app_data_dir.join("planner.sqlite");
        let db = Arc::new(Database::new(&db_path)?);
        let settings = db.get_settings()?;
        let graph = GraphStore::new(db.clone());
        let sync = SyncQueue::new(graph.clone(), Duration::from_millis(settings.sync_debounce_ms));
        sync.attach();

        tracing::info!(path = %db_path.display(), "planner opened");
        Ok(Arc::new(Self {
            db,
            graph,
            sync,
            app_data_dir,
        }))
    }

    pub fn app_data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn sync_queue(&self) -> &SyncQueue {
        &self.sync
    }

    /// Starts the debounced push loop. Needs a running tokio runtime.
    pub fn start_sync(&self) {
        self.sync.start();
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    /// A changed debounce applies the next time the planner is opened.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.db.update_settings(update)
    }

    pub fn create_task(&self, payload: CreateTaskPayload) -> AppResult<Guarded<Task>> {
        self.graph.create_task(payload)
    }

    /// Reopens recurring tasks that came due, then returns the day's set.
    pub fn begin_day<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> AppResult<DailySelection> {
        let reopened = self.graph.reactivate_due(now)?;
        if !reopened.is_empty() {
            tracing::debug!(%day, reopened = ?reopened, "recurring tasks back before selection");
        }
        self.daily_selection(day, rng)
    }

    /// The set for `day`, drawn on first access. Identities of deleted tasks
    /// are dropped from the stored record.
    pub fn daily_selection<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        rng: &mut R,
    ) -> AppResult<DailySelection> {
        let settings = self.db.get_settings()?;
        self.db.write(|tx| load_or_create(tx, day, &settings, rng))
    }

    pub fn toggle_pin<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        task_id: TaskId,
        rng: &mut R,
    ) -> AppResult<Guarded<DailySelection>> {
        self.update_selection(day, rng, "toggle-pin", |conn, current, _| {
            if !current.pinned.contains(&task_id) && !db::tasks::task_exists(conn, task_id)? {
                return Ok(Err(Rejection::TaskMissing(task_id)));
            }
            Ok(slots::toggle_pin(current, task_id))
        })
    }

    /// Creates a task and pins it into the day's set in one transaction, so a
    /// rejection leaves no task behind.
    pub fn create_and_pin<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        payload: CreateTaskPayload,
        rng: &mut R,
    ) -> AppResult<Guarded<(Task, DailySelection)>> {
        let settings = self.db.get_settings()?;
        let outcome = self.db.write_guarded(|tx| {
            let conn: &Connection = tx;
            let current = load_or_create(conn, day, &settings, rng)?;
            if let Err(rejection) = slots::check_pin_capacity(&current) {
                return Ok(Err(rejection));
            }
            let task = match insert_new_task(conn, &payload)? {
                Ok(task) => task,
                Err(rejection) => return Ok(Err(rejection)),
            };
            let next = match slots::pin_new_task(&current, task.id) {
                Ok(next) => next,
                Err(rejection) => return Ok(Err(rejection)),
            };
            db::daily::save_selection(conn, &next)?;
            Ok(Ok((task, next)))
        })?;

        match &outcome {
            Ok((task, next)) => {
                self.graph.announce_created(task, payload.parent_id);
                tracing::info!(
                    operation = "create-and-pin",
                    %day,
                    task_ids = ?next.task_ids,
                    "daily selection updated"
                );
            }
            Err(rejection) => tracing::debug!(
                operation = "create-and-pin",
                %day,
                %rejection,
                "daily selection change rejected"
            ),
        }
        Ok(outcome)
    }

    /// Replaces one unprotected entry with a fresh draw from outside the set.
    pub fn swap_task<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        task_id: TaskId,
        rng: &mut R,
    ) -> AppResult<Guarded<DailySelection>> {
        let settings = self.db.get_settings()?;
        self.update_selection(day, rng, "swap", |conn, current, rng| {
            if !current.contains(task_id) {
                return Ok(Err(Rejection::NotInDailySet(task_id)));
            }
            if current.is_protected(task_id) {
                return Ok(Err(Rejection::ProtectedSlot));
            }
            let exclude = current.task_ids.iter().copied().collect::<HashSet<_>>();
            let drawn = draw(conn, day, &settings, &exclude, 1, rng)?;
            let Some(replacement) = drawn.first().copied() else {
                return Ok(Err(Rejection::NothingToDraw));
            };
            Ok(slots::swap_slot(current, task_id, replacement))
        })
    }

    /// Keeps pinned and completed entries and redraws the rest.
    pub fn refresh_daily<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        rng: &mut R,
    ) -> AppResult<Guarded<DailySelection>> {
        let settings = self.db.get_settings()?;
        self.update_selection(day, rng, "refresh", |conn, current, rng| {
            let protected = current
                .task_ids
                .iter()
                .copied()
                .filter(|id| current.is_protected(*id))
                .collect::<HashSet<_>>();
            let wanted = TARGET_SLOTS.saturating_sub(protected.len());
            let drawn = draw(conn, day, &settings, &protected, wanted, rng)?;
            Ok(Ok(slots::apply_refresh(current, &drawn)))
        })
    }

    pub fn complete_task(&self, day: NaiveDate, task_id: TaskId) -> AppResult<Guarded<StatusUndo>> {
        let outcome = self.graph.complete(task_id)?;
        if outcome.is_ok() {
            self.patch_existing(day, |current| slots::mark_completed(current, task_id))?;
        }
        Ok(outcome)
    }

    pub fn skip_task(&self, day: NaiveDate, task_id: TaskId) -> AppResult<Guarded<StatusUndo>> {
        let outcome = self.graph.skip(task_id)?;
        if outcome.is_ok() {
            self.patch_existing(day, |current| slots::unmark_completed(current, task_id))?;
        }
        Ok(outcome)
    }

    /// Undoes a complete or skip, keeping the day's completed set in step.
    pub fn restore_task_status(
        &self,
        day: NaiveDate,
        undo: &StatusUndo,
    ) -> AppResult<Guarded<Task>> {
        let outcome = self.graph.restore_status(undo)?;
        if let Ok(task) = &outcome {
            let task_id = task.id;
            if task.completed_at.is_some() {
                self.patch_existing(day, |current| slots::mark_completed(current, task_id))?;
            } else {
                self.patch_existing(day, |current| slots::unmark_completed(current, task_id))?;
            }
        }
        Ok(outcome)
    }

    pub fn mark_worked(
        &self,
        day: NaiveDate,
        task_id: TaskId,
        at: DateTime<Utc>,
    ) -> AppResult<Guarded<Task>> {
        let outcome = self.graph.mark_worked(task_id, at)?;
        if outcome.is_ok() {
            self.patch_existing(day, |current| slots::mark_worked(current, task_id))?;
        }
        Ok(outcome)
    }

    /// The day's set in display order.
    pub fn sorted_daily_tasks<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        rng: &mut R,
    ) -> AppResult<Vec<Task>> {
        let current = self.daily_selection(day, rng)?;
        let mut tasks = self.graph.tasks_by_ids(&current.task_ids)?;
        selection::sort_for_display(&mut tasks, &current);
        Ok(tasks)
    }

    /// Active children of the navigation position (roots at the top level) in
    /// display order. Does not create the day's set.
    pub fn view_tasks(&self, day: NaiveDate, navigation: &NavigationStack) -> AppResult<Vec<Task>> {
        let (index, current) = self.db.read(|conn| {
            let index = GraphIndex::load(conn)?;
            let current = db::daily::get_selection(conn, day)?
                .unwrap_or_else(|| DailySelection::empty(day));
            Ok((index, current))
        })?;
        let ids = match navigation.current() {
            Some(task_id) => index.children_of(task_id),
            None => index.roots(),
        };
        let mut tasks = self
            .graph
            .tasks_by_ids(&ids)?
            .into_iter()
            .filter(Task::is_active)
            .collect::<Vec<_>>();
        selection::sort_for_display(&mut tasks, &current);
        Ok(tasks)
    }

    pub fn navigate_to(
        &self,
        navigation: &mut NavigationStack,
        task_id: TaskId,
    ) -> AppResult<Guarded<()>> {
        let index = self.graph.index()?;
        if !index.contains(task_id) {
            return Ok(Err(Rejection::TaskMissing(task_id)));
        }
        navigation.jump_to(&index, task_id);
        Ok(Ok(()))
    }

    /// Drops navigation entries for tasks deleted since the stack was built.
    pub fn prune_navigation(&self, navigation: &mut NavigationStack) -> AppResult<()> {
        let known = self.db.read(db::tasks::all_ids)?;
        navigation.retain_existing(&known);
        Ok(())
    }

    fn update_selection<R: Rng + ?Sized>(
        &self,
        day: NaiveDate,
        rng: &mut R,
        operation: &'static str,
        apply: impl FnOnce(
            &Connection,
            &DailySelection,
            &mut R,
        ) -> AppResult<Guarded<DailySelection>>,
    ) -> AppResult<Guarded<DailySelection>> {
        let settings = self.db.get_settings()?;
        let outcome = self.db.write_guarded(|tx| {
            let conn: &Connection = tx;
            let current = load_or_create(conn, day, &settings, rng)?;
            let next = match apply(conn, &current, rng)? {
                Ok(next) => next,
                Err(rejection) => return Ok(Err(rejection)),
            };
            db::daily::save_selection(conn, &next)?;
            Ok(Ok(next))
        })?;

        match &outcome {
            Ok(next) => tracing::info!(
                operation,
                %day,
                task_ids = ?next.task_ids,
                "daily selection updated"
            ),
            Err(rejection) => tracing::debug!(
                operation,
                %day,
                %rejection,
                "daily selection change rejected"
            ),
        }
        Ok(outcome)
    }

    /// Applies `apply` to the stored record for `day`, if one exists.
    fn patch_existing(
        &self,
        day: NaiveDate,
        apply: impl FnOnce(&DailySelection) -> DailySelection,
    ) -> AppResult<()> {
        self.db.write(|tx| {
            if let Some(current) = db::daily::get_selection(tx, day)? {
                let next = apply(&current);
                if next != current {
                    db::daily::save_selection(tx, &next)?;
                }
            }
            Ok(())
        })
    }
}

fn load_or_create<R: Rng + ?Sized>(
    conn: &Connection,
    day: NaiveDate,
    settings: &AppSettings,
    rng: &mut R,
) -> AppResult<DailySelection> {
    if let Some(saved) = db::daily::get_selection(conn, day)? {
        let known = db::tasks::all_ids(conn)?;
        let pruned = slots::retain_existing(&saved, &known);
        if pruned != saved {
            tracing::debug!(%day, "dropping deleted tasks from daily selection");
            db::daily::save_selection(conn, &pruned)?;
        }
        return Ok(pruned);
    }

    let mut created = DailySelection::empty(day);
    created.task_ids = draw(conn, day, settings, &HashSet::new(), TARGET_SLOTS, rng)?;
    db::daily::save_selection(conn, &created)?;
    tracing::info!(%day, task_ids = ?created.task_ids, "daily selection created");
    Ok(created)
}

fn draw<R: Rng + ?Sized>(
    conn: &Connection,
    day: NaiveDate,
    settings: &AppSettings,
    exclude: &HashSet<TaskId>,
    count: usize,
    rng: &mut R,
) -> AppResult<Vec<TaskId>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let index = GraphIndex::load(conn)?;
    let tasks = db::tasks::list_tasks(conn, true)?;
    let candidates = selection::eligible_candidates(&tasks, &index, day, exclude);
    let history = db::daily::recent_selections(conn, day, settings.history_days)?;
    let last_selected = selection::last_selected_days(&history);
    let ctx = SelectionContext {
        day,
        weights: &settings.selection,
        last_selected: &last_selected,
    };
    Ok(selection::pick_weighted(&candidates, count, &ctx, rng))
}
