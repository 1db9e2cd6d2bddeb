//! Weighted daily selection and display ordering.
//!
//! Nothing here touches storage or the clock: the calendar day and the
//! selection history are passed in by the caller.

use crate::graph::GraphIndex;
use crate::models::{DailySelection, Difficulty, Priority, SelectionWeights, Task, TaskId};
use chrono::NaiveDate;
use rand::Rng;
use std::collections::{HashMap, HashSet};

const BASE_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub day: NaiveDate,
    pub weights: &'a SelectionWeights,
    /// Most recent earlier day each task appeared in a daily set.
    pub last_selected: &'a HashMap<TaskId, NaiveDate>,
}

pub fn task_weight(task: &Task, ctx: &SelectionContext<'_>) -> f64 {
    let weights = ctx.weights;
    let mut weight = BASE_WEIGHT;

    if task.priority == Priority::High {
        weight *= weights.high_priority;
    }

    let reference = task.last_worked_at.unwrap_or(task.created_at).date_naive();
    let idle_days = (ctx.day - reference)
        .num_days()
        .clamp(0, i64::from(weights.staleness_cap_days));
    weight *= 1.0 + weights.staleness_per_day * idle_days as f64;

    if task.started_at.is_some() {
        weight *= weights.started;
    }

    if let Some(last) = ctx.last_selected.get(&task.id) {
        let since = (ctx.day - *last).num_days().max(1);
        let penalty =
            (1.0 - weights.repeat_penalty / since as f64).max(weights.repeat_penalty_floor);
        weight *= penalty;
    }

    weight.max(f64::MIN_POSITIVE)
}

/// Draws up to `count` distinct tasks, each proportional to its weight among
/// those still in the pool. When the pool holds a quick task, one slot is
/// drawn from the quick tasks first.
pub fn pick_weighted<R: Rng + ?Sized>(
    candidates: &[Task],
    count: usize,
    ctx: &SelectionContext<'_>,
    rng: &mut R,
) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    let mut pool = candidates
        .iter()
        .filter(|task| seen.insert(task.id))
        .map(|task| (task, task_weight(task, ctx)))
        .collect::<Vec<_>>();

    let target = count.min(pool.len());
    let mut picked = Vec::with_capacity(target);
    if target == 0 {
        return picked;
    }

    let quick = pool
        .iter()
        .enumerate()
        .filter(|(_, (task, _))| task.difficulty == Difficulty::Quick)
        .map(|(position, _)| position)
        .collect::<Vec<_>>();
    if !quick.is_empty() {
        let quick_weights = quick.iter().map(|position| pool[*position].1).collect::<Vec<_>>();
        let chosen = quick[draw_index(&quick_weights, rng)];
        picked.push(pool.remove(chosen).0.id);
    }

    while picked.len() < target {
        let weights = pool.iter().map(|(_, weight)| *weight).collect::<Vec<_>>();
        let chosen = draw_index(&weights, rng);
        picked.push(pool.remove(chosen).0.id);
    }

    tracing::debug!(requested = count, picked = ?picked, "weighted draw finished");
    picked
}

fn draw_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total = weights.iter().sum::<f64>();
    if !total.is_finite() || total <= 0.0 {
        return rng.random_range(0..weights.len());
    }
    let mut remaining = rng.random::<f64>() * total;
    for (position, weight) in weights.iter().enumerate() {
        if remaining < *weight {
            return position;
        }
        remaining -= weight;
    }
    weights.len() - 1
}

/// Tasks the engine may draw for `day`: active leaves that are not blocked,
/// not worked on that day, and not in `exclude`. Input order is kept.
pub fn eligible_candidates(
    tasks: &[Task],
    index: &GraphIndex,
    day: NaiveDate,
    exclude: &HashSet<TaskId>,
) -> Vec<Task> {
    let leaves = index.leaves().into_iter().collect::<HashSet<_>>();
    tasks
        .iter()
        .filter(|task| task.is_active())
        .filter(|task| leaves.contains(&task.id))
        .filter(|task| !index.is_blocked(task.id))
        .filter(|task| !task.worked_on(day))
        .filter(|task| !exclude.contains(&task.id))
        .cloned()
        .collect()
}

/// Last day each task appeared in any of `history`.
pub fn last_selected_days(history: &[DailySelection]) -> HashMap<TaskId, NaiveDate> {
    let mut last = HashMap::new();
    for selection in history {
        for task_id in &selection.task_ids {
            last.entry(*task_id)
                .and_modify(|day: &mut NaiveDate| *day = (*day).max(selection.day))
                .or_insert(selection.day);
        }
    }
    last
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortTier {
    PinnedInDaily,
    HighPriority,
    InDaily,
    Normal,
    WorkedToday,
}

pub fn sort_tier(task: &Task, selection: &DailySelection) -> SortTier {
    if selection.worked.contains(&task.id) || task.worked_on(selection.day) {
        SortTier::WorkedToday
    } else if selection.pinned.contains(&task.id) && selection.contains(task.id) {
        SortTier::PinnedInDaily
    } else if task.priority == Priority::High {
        SortTier::HighPriority
    } else if selection.contains(task.id) {
        SortTier::InDaily
    } else {
        SortTier::Normal
    }
}

/// Orders tasks by tier, then by creation.
pub fn sort_for_display(tasks: &mut [Task], selection: &DailySelection) {
    tasks.sort_by_key(|task| (sort_tier(task, selection), task.created_at, task.id));
}

#[cfg(test)]
mod tests {
    use super::{
        eligible_candidates, last_selected_days, pick_weighted, sort_for_display, sort_tier,
        task_weight, SelectionContext, SortTier,
    };
    use crate::graph::GraphIndex;
    use crate::models::{
        DailySelection, DependencyEdge, Difficulty, HierarchyEdge, Priority, SelectionWeights, Task,
    };
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date")
    }

    fn sample(id: i64) -> Task {
        let created = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).single().expect("valid time")
            + Duration::seconds(id);
        Task {
            id,
            sync_id: format!("sync-{}", id),
            name: format!("task {}", id),
            created_at: created,
            updated_at: created,
            completed_at: None,
            started_at: None,
            skipped_at: None,
            last_worked_at: None,
            priority: Priority::Normal,
            difficulty: Difficulty::Normal,
            link: None,
            recurrence_days: None,
            next_due_at: None,
        }
    }

    #[test]
    fn empty_pool_and_zero_count_yield_nothing() {
        let weights = SelectionWeights::default();
        let history = HashMap::new();
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pick_weighted(&[], 3, &ctx, &mut rng).is_empty());
        assert!(pick_weighted(&[sample(1)], 0, &ctx, &mut rng).is_empty());
    }

    #[test]
    fn oversized_request_returns_every_candidate_once() {
        let weights = SelectionWeights::default();
        let history = HashMap::new();
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let pool = vec![sample(1), sample(2), sample(2), sample(3)];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = pick_weighted(&pool, 10, &ctx, &mut rng);
            assert_eq!(picked.len(), 3);
            picked.sort_unstable();
            assert_eq!(picked, vec![1, 2, 3]);
        }
    }

    #[test]
    fn single_quick_task_is_always_drawn() {
        let weights = SelectionWeights::default();
        let history = HashMap::new();
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let mut pool = (1..=12).map(sample).collect::<Vec<_>>();
        for task in pool.iter_mut().take(11) {
            task.priority = Priority::High;
        }
        pool[11].difficulty = Difficulty::Quick;

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let picked = pick_weighted(&pool, 1, &ctx, &mut rng);
            assert_eq!(picked, vec![12]);
        }
        for _ in 0..200 {
            let picked = pick_weighted(&pool, 4, &ctx, &mut rng);
            assert!(picked.contains(&12));
            assert_eq!(picked.iter().collect::<HashSet<_>>().len(), picked.len());
        }
    }

    #[test]
    fn high_priority_is_favoured() {
        let weights = SelectionWeights::default();
        let history = HashMap::new();
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let mut high = sample(1);
        high.priority = Priority::High;
        let pool = vec![high, sample(2)];

        let mut rng = StdRng::seed_from_u64(42);
        let wins = (0..4000)
            .filter(|_| pick_weighted(&pool, 1, &ctx, &mut rng) == vec![1])
            .count();
        // Expected share is 3 / 4.
        assert!(wins > 2700 && wins < 3300, "high priority won {} of 4000", wins);
    }

    #[test]
    fn weights_reflect_staleness_progress_and_recent_selection() {
        let weights = SelectionWeights::default();
        let mut history = HashMap::new();
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let fresh = sample(1);
        let base = task_weight(&fresh, &ctx);
        assert!((base - 1.0).abs() < 1e-9);

        let mut stale = sample(2);
        stale.last_worked_at = Some(stale.created_at - Duration::days(40));
        let capped = 1.0 + weights.staleness_per_day * f64::from(weights.staleness_cap_days);
        assert!((task_weight(&stale, &ctx) - capped).abs() < 1e-9);

        let mut started = sample(3);
        started.started_at = Some(started.created_at);
        assert!(task_weight(&started, &ctx) > base);

        history.insert(1, day() - Duration::days(1));
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let yesterday = task_weight(&fresh, &ctx);
        history.insert(1, day() - Duration::days(5));
        let ctx = SelectionContext { day: day(), weights: &weights, last_selected: &history };
        let last_week = task_weight(&fresh, &ctx);
        assert!(yesterday < last_week && last_week < base);
    }

    #[test]
    fn eligibility_filters_parents_blocked_and_worked() {
        let links = [HierarchyEdge { parent_id: 1, child_id: 2 }];
        let deps = [DependencyEdge { task_id: 3, depends_on_id: 4 }];
        let ids = (1..=5).collect::<HashSet<_>>();
        let index = GraphIndex::build(ids.clone(), ids, &links, &deps);
        let mut tasks = (1..=5).map(sample).collect::<Vec<_>>();
        tasks[4].last_worked_at =
            Some(Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).single().expect("time"));

        let eligible = eligible_candidates(&tasks, &index, day(), &HashSet::from([4]));
        assert_eq!(eligible.iter().map(|task| task.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn history_keeps_latest_day() {
        let mut older = DailySelection::empty(day() - Duration::days(3));
        older.task_ids = vec![1, 2];
        let mut newer = DailySelection::empty(day() - Duration::days(1));
        newer.task_ids = vec![2];
        let last = last_selected_days(&[newer.clone(), older.clone()]);
        assert_eq!(last.get(&1), Some(&older.day));
        assert_eq!(last.get(&2), Some(&newer.day));
    }

    #[test]
    fn worked_today_sorts_after_everything() {
        let mut selection = DailySelection::empty(day());
        selection.task_ids = vec![1, 2, 3];
        selection.pinned.insert(1);
        selection.worked.insert(1);
        selection.pinned.insert(2);

        let mut high_pinned_worked = sample(1);
        high_pinned_worked.priority = Priority::High;
        let pinned = sample(2);
        let in_daily = sample(3);
        let mut high = sample(4);
        high.priority = Priority::High;
        let normal = sample(5);

        assert_eq!(sort_tier(&high_pinned_worked, &selection), SortTier::WorkedToday);
        assert_eq!(sort_tier(&pinned, &selection), SortTier::PinnedInDaily);

        let mut tasks = vec![normal, high_pinned_worked, in_daily, high, pinned];
        sort_for_display(&mut tasks, &selection);
        assert_eq!(tasks.iter().map(|task| task.id).collect::<Vec<_>>(), vec![2, 4, 3, 5, 1]);
    }
}
