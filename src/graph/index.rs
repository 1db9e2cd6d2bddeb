//! In-memory adjacency index over both edge relations.
//!
//! Built once per query or mutation from the rows visible inside the current
//! transaction. All traversals are explicit worklists, so nothing here depends
//! on recursive SQL support in the storage engine.

use crate::db;
use crate::errors::AppResult;
use crate::models::{DependencyEdge, HierarchyEdge, TaskId};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// parent -> child
    Hierarchy,
    /// task -> depends-on
    Dependency,
}

#[derive(Debug, Default, Clone)]
pub struct GraphIndex {
    known: HashSet<TaskId>,
    active: HashSet<TaskId>,
    children: HashMap<TaskId, BTreeSet<TaskId>>,
    parents: HashMap<TaskId, BTreeSet<TaskId>>,
    depends_on: HashMap<TaskId, BTreeSet<TaskId>>,
    dependents: HashMap<TaskId, BTreeSet<TaskId>>,
}

impl GraphIndex {
    pub fn build(
        known: HashSet<TaskId>,
        active: HashSet<TaskId>,
        links: &[HierarchyEdge],
        dependencies: &[DependencyEdge],
    ) -> Self {
        let mut index = Self {
            known,
            active,
            ..Self::default()
        };
        for edge in links {
            index.insert(Relation::Hierarchy, edge.parent_id, edge.child_id);
        }
        for edge in dependencies {
            index.insert(Relation::Dependency, edge.task_id, edge.depends_on_id);
        }
        index
    }

    pub fn load(conn: &Connection) -> AppResult<Self> {
        let known = db::tasks::all_ids(conn)?;
        let active = db::tasks::active_ids(conn)?;
        let links = db::edges::load_links(conn)?;
        let dependencies = db::edges::load_dependencies(conn)?;
        Ok(Self::build(known, active, &links, &dependencies))
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.known.contains(&task_id)
    }

    pub fn is_active(&self, task_id: TaskId) -> bool {
        self.active.contains(&task_id)
    }

    pub fn has_edge(&self, relation: Relation, from: TaskId, to: TaskId) -> bool {
        self.forward(relation)
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    pub fn insert(&mut self, relation: Relation, from: TaskId, to: TaskId) {
        let (forward, backward) = self.maps_mut(relation);
        forward.entry(from).or_default().insert(to);
        backward.entry(to).or_default().insert(from);
    }

    pub fn remove(&mut self, relation: Relation, from: TaskId, to: TaskId) {
        let (forward, backward) = self.maps_mut(relation);
        if let Some(targets) = forward.get_mut(&from) {
            targets.remove(&to);
        }
        if let Some(sources) = backward.get_mut(&to) {
            sources.remove(&from);
        }
    }

    pub fn add_task(&mut self, task_id: TaskId, active: bool) {
        self.known.insert(task_id);
        if active {
            self.active.insert(task_id);
        }
    }

    /// Whether adding `from -> to` would close a cycle among active tasks.
    /// Self-edges always count as cycles.
    pub fn would_cycle(&self, relation: Relation, from: TaskId, to: TaskId) -> bool {
        if from == to {
            return true;
        }
        if !self.is_active(from) || !self.is_active(to) {
            return false;
        }
        self.reaches(relation, to, from, |node| self.active.contains(&node))
    }

    /// Whether turning `task_id` active again would put it on an active cycle
    /// in either relation.
    pub fn reactivation_would_cycle(&self, task_id: TaskId) -> bool {
        let traversable = |node: TaskId| node == task_id || self.active.contains(&node);
        [Relation::Hierarchy, Relation::Dependency].into_iter().any(|relation| {
            self.forward(relation)
                .get(&task_id)
                .into_iter()
                .flatten()
                .filter(|next| self.active.contains(*next))
                .any(|next| self.reaches(relation, *next, task_id, traversable))
        })
    }

    /// Forward worklist search from `start` to `goal`, only stepping onto
    /// nodes accepted by `traversable`.
    pub fn reaches(
        &self,
        relation: Relation,
        start: TaskId,
        goal: TaskId,
        traversable: impl Fn(TaskId) -> bool,
    ) -> bool {
        let forward = self.forward(relation);
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == goal {
                return true;
            }
            for next in forward.get(&current).into_iter().flatten() {
                if traversable(*next) && visited.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        false
    }

    /// `root` plus every task reachable below it through hierarchy edges,
    /// regardless of status.
    pub fn subtree(&self, root: TaskId) -> BTreeSet<TaskId> {
        let mut closure = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            for child in self.children.get(&current).into_iter().flatten() {
                if closure.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        closure
    }

    pub fn children_of(&self, task_id: TaskId) -> Vec<TaskId> {
        ids(self.children.get(&task_id))
    }

    pub fn parents_of(&self, task_id: TaskId) -> Vec<TaskId> {
        ids(self.parents.get(&task_id))
    }

    pub fn depends_on(&self, task_id: TaskId) -> Vec<TaskId> {
        ids(self.depends_on.get(&task_id))
    }

    pub fn dependents_of(&self, task_id: TaskId) -> Vec<TaskId> {
        ids(self.dependents.get(&task_id))
    }

    /// Active tasks without an active child, ascending.
    pub fn leaves(&self) -> Vec<TaskId> {
        self.sorted_active()
            .into_iter()
            .filter(|id| !self.any_active(self.children.get(id)))
            .collect()
    }

    /// Active tasks without an active parent, ascending.
    pub fn roots(&self) -> Vec<TaskId> {
        self.sorted_active()
            .into_iter()
            .filter(|id| !self.any_active(self.parents.get(id)))
            .collect()
    }

    pub fn is_blocked(&self, task_id: TaskId) -> bool {
        self.any_active(self.depends_on.get(&task_id))
    }

    pub fn blocked(&self, task_ids: &[TaskId]) -> Vec<TaskId> {
        task_ids
            .iter()
            .copied()
            .filter(|id| self.is_blocked(*id))
            .collect()
    }

    /// Root-first chain of ancestors ending at the task's immediate parent.
    /// With several active parents the lowest identity is followed.
    pub fn ancestor_path(&self, task_id: TaskId) -> Vec<TaskId> {
        let mut path = Vec::new();
        let mut seen = HashSet::from([task_id]);
        let mut current = task_id;
        while let Some(parent) = self
            .parents
            .get(&current)
            .into_iter()
            .flatten()
            .find(|parent| self.active.contains(*parent))
            .copied()
        {
            if !seen.insert(parent) {
                break;
            }
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    fn any_active(&self, set: Option<&BTreeSet<TaskId>>) -> bool {
        set.into_iter().flatten().any(|id| self.active.contains(id))
    }

    fn sorted_active(&self) -> Vec<TaskId> {
        let mut ids = self.active.iter().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    fn forward(&self, relation: Relation) -> &HashMap<TaskId, BTreeSet<TaskId>> {
        match relation {
            Relation::Hierarchy => &self.children,
            Relation::Dependency => &self.depends_on,
        }
    }

    fn maps_mut(
        &mut self,
        relation: Relation,
    ) -> (
        &mut HashMap<TaskId, BTreeSet<TaskId>>,
        &mut HashMap<TaskId, BTreeSet<TaskId>>,
    ) {
        match relation {
            Relation::Hierarchy => (&mut self.children, &mut self.parents),
            Relation::Dependency => (&mut self.depends_on, &mut self.dependents),
        }
    }
}

fn ids(set: Option<&BTreeSet<TaskId>>) -> Vec<TaskId> {
    set.map(|set| set.iter().copied().collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{GraphIndex, Relation};
    use crate::models::{DependencyEdge, HierarchyEdge};
    use std::collections::HashSet;

    fn link(parent_id: i64, child_id: i64) -> HierarchyEdge {
        HierarchyEdge { parent_id, child_id }
    }

    fn index(
        ids: &[i64],
        inactive: &[i64],
        links: &[HierarchyEdge],
        deps: &[DependencyEdge],
    ) -> GraphIndex {
        let known = ids.iter().copied().collect::<HashSet<_>>();
        let active = ids
            .iter()
            .copied()
            .filter(|id| !inactive.contains(id))
            .collect::<HashSet<_>>();
        GraphIndex::build(known, active, links, deps)
    }

    #[test]
    fn closing_a_chain_is_a_cycle() {
        let graph = index(&[1, 2, 3], &[], &[link(1, 2), link(2, 3)], &[]);
        assert!(graph.would_cycle(Relation::Hierarchy, 3, 1));
        assert!(graph.would_cycle(Relation::Hierarchy, 2, 1));
        assert!(graph.would_cycle(Relation::Hierarchy, 2, 2));
        assert!(!graph.would_cycle(Relation::Hierarchy, 1, 3));
    }

    #[test]
    fn completed_nodes_break_reachability() {
        let graph = index(&[1, 2, 3], &[2], &[link(1, 2), link(2, 3)], &[]);
        assert!(!graph.would_cycle(Relation::Hierarchy, 3, 1));
        assert!(!graph.reactivation_would_cycle(2));

        let with_back_edge = index(&[1, 2, 3], &[2], &[link(1, 2), link(2, 3), link(3, 1)], &[]);
        assert!(with_back_edge.reactivation_would_cycle(2));
    }

    #[test]
    fn leaves_and_roots_ignore_inactive_neighbours() {
        let graph = index(&[1, 2, 3, 4], &[3], &[link(1, 2), link(2, 3), link(3, 4)], &[]);
        assert_eq!(graph.leaves(), vec![2, 4]);
        assert_eq!(graph.roots(), vec![1, 4]);
    }

    #[test]
    fn blocked_requires_an_active_target() {
        let deps = [
            DependencyEdge { task_id: 1, depends_on_id: 2 },
            DependencyEdge { task_id: 3, depends_on_id: 4 },
        ];
        let graph = index(&[1, 2, 3, 4], &[4], &[], &deps);
        assert_eq!(graph.blocked(&[1, 2, 3, 4]), vec![1]);
    }

    #[test]
    fn ancestor_path_follows_lowest_parent() {
        let graph = index(
            &[1, 2, 3, 4, 5],
            &[],
            &[link(1, 3), link(2, 3), link(3, 5), link(4, 5)],
            &[],
        );
        assert_eq!(graph.ancestor_path(5), vec![1, 3]);
        assert!(graph.ancestor_path(1).is_empty());
    }

    #[test]
    fn subtree_includes_shared_descendants_once() {
        let graph = index(
            &[1, 2, 3, 4, 9],
            &[3],
            &[link(1, 2), link(1, 3), link(2, 4), link(3, 4), link(9, 4)],
            &[],
        );
        let closure = graph.subtree(1).into_iter().collect::<Vec<_>>();
        assert_eq!(closure, vec![1, 2, 3, 4]);
    }
}
