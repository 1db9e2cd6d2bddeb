use crate::graph::GraphIndex;
use crate::models::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where the caller is in the graph, root first. An empty stack is the top
/// level. Owned by the presentation side; the graph store never sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationStack {
    path: Vec<TaskId>,
}

impl NavigationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<TaskId> {
        self.path.last().copied()
    }

    pub fn breadcrumb(&self) -> &[TaskId] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Descends into `task_id`. Entering the current task again is a no-op.
    pub fn enter(&mut self, task_id: TaskId) {
        if self.current() != Some(task_id) {
            self.path.push(task_id);
        }
    }

    /// Leaves the current task and returns the new current one.
    pub fn back(&mut self) -> Option<TaskId> {
        self.path.pop();
        self.current()
    }

    pub fn reset(&mut self) {
        self.path.clear();
    }

    /// Replaces the stack with one ancestor chain ending at `task_id`.
    pub fn jump_to(&mut self, index: &GraphIndex, task_id: TaskId) {
        let mut path = index.ancestor_path(task_id);
        path.push(task_id);
        self.path = path;
    }

    /// Cuts the stack at the first task that no longer exists; everything
    /// below it lost its context.
    pub fn retain_existing(&mut self, existing: &HashSet<TaskId>) {
        if let Some(cut) = self.path.iter().position(|id| !existing.contains(id)) {
            tracing::debug!(
                task_id = self.path[cut],
                depth = cut,
                "navigation cut at missing task"
            );
            self.path.truncate(cut);
        }
    }
}
