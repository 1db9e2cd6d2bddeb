use super::{GraphChange, GraphIndex, GraphStore, Relation};
use crate::db;
use crate::errors::{AppResult, Guarded, Rejection};
use crate::models::{DependencyEdge, HierarchyEdge, MoveUndo, TaskId};
use rusqlite::Connection;

impl GraphStore {
    /// Adds `parent -> child`, refusing self-edges, duplicates and cycles.
    pub fn link(&self, parent_id: TaskId, child_id: TaskId) -> AppResult<Guarded<HierarchyEdge>> {
        let edge = HierarchyEdge { parent_id, child_id };
        let outcome = self.db.write_guarded(|tx| {
            if let Err(rejection) = check_new_edge(tx, Relation::Hierarchy, parent_id, child_id)? {
                return Ok(Err(rejection));
            }
            db::edges::insert_link(tx, edge)?;
            Ok(Ok(edge))
        })?;
        self.log_edge_outcome("link", parent_id, child_id, &outcome);
        Ok(outcome)
    }

    pub fn unlink(&self, parent_id: TaskId, child_id: TaskId) -> AppResult<Guarded<HierarchyEdge>> {
        let edge = HierarchyEdge { parent_id, child_id };
        let outcome = self.db.write_guarded(|tx| {
            if db::edges::delete_link(tx, edge)? {
                Ok(Ok(edge))
            } else {
                Ok(Err(Rejection::MissingEdge))
            }
        })?;
        self.log_edge_outcome("unlink", parent_id, child_id, &outcome);
        Ok(outcome)
    }

    /// Re-homes `task_id` from one parent to another in a single transaction.
    /// The returned token undoes the move when passed back with the parents
    /// swapped.
    pub fn move_task(
        &self,
        task_id: TaskId,
        from_parent_id: TaskId,
        to_parent_id: TaskId,
    ) -> AppResult<Guarded<MoveUndo>> {
        let outcome = self.db.write_guarded(|tx| {
            if task_id == to_parent_id {
                return Ok(Err(Rejection::SelfEdge));
            }
            let mut index = GraphIndex::load(tx)?;
            for id in [task_id, from_parent_id, to_parent_id] {
                if !index.contains(id) {
                    return Ok(Err(Rejection::TaskMissing(id)));
                }
            }
            if !index.has_edge(Relation::Hierarchy, from_parent_id, task_id) {
                return Ok(Err(Rejection::MissingEdge));
            }
            if index.has_edge(Relation::Hierarchy, to_parent_id, task_id) {
                return Ok(Err(Rejection::DuplicateEdge));
            }
            index.remove(Relation::Hierarchy, from_parent_id, task_id);
            if index.would_cycle(Relation::Hierarchy, to_parent_id, task_id) {
                return Ok(Err(Rejection::WouldCreateCycle));
            }

            db::edges::delete_link(
                tx,
                HierarchyEdge {
                    parent_id: from_parent_id,
                    child_id: task_id,
                },
            )?;
            db::edges::insert_link(
                tx,
                HierarchyEdge {
                    parent_id: to_parent_id,
                    child_id: task_id,
                },
            )?;
            Ok(Ok(MoveUndo {
                task_id,
                from_parent_id,
                to_parent_id,
            }))
        })?;

        match &outcome {
            Ok(_) => {
                tracing::info!(task_id, from_parent_id, to_parent_id, "task moved");
                self.emit(GraphChange::Upserted(vec![task_id]));
            }
            Err(rejection) => {
                tracing::debug!(task_id, from_parent_id, to_parent_id, %rejection, "move rejected");
            }
        }
        Ok(outcome)
    }

    /// Adds `task -> depends_on`, refusing self-edges, duplicates and cycles.
    pub fn add_dependency(
        &self,
        task_id: TaskId,
        depends_on_id: TaskId,
    ) -> AppResult<Guarded<DependencyEdge>> {
        let edge = DependencyEdge { task_id, depends_on_id };
        let outcome = self.db.write_guarded(|tx| {
            if let Err(rejection) =
                check_new_edge(tx, Relation::Dependency, task_id, depends_on_id)?
            {
                return Ok(Err(rejection));
            }
            db::edges::insert_dependency(tx, edge)?;
            Ok(Ok(edge))
        })?;
        self.log_edge_outcome("add-dependency", task_id, depends_on_id, &outcome);
        Ok(outcome)
    }

    pub fn remove_dependency(
        &self,
        task_id: TaskId,
        depends_on_id: TaskId,
    ) -> AppResult<Guarded<DependencyEdge>> {
        let edge = DependencyEdge { task_id, depends_on_id };
        let outcome = self.db.write_guarded(|tx| {
            if db::edges::delete_dependency(tx, edge)? {
                Ok(Ok(edge))
            } else {
                Ok(Err(Rejection::MissingEdge))
            }
        })?;
        self.log_edge_outcome("remove-dependency", task_id, depends_on_id, &outcome);
        Ok(outcome)
    }

    fn log_edge_outcome<T>(
        &self,
        operation: &'static str,
        from: TaskId,
        to: TaskId,
        outcome: &Guarded<T>,
    ) {
        match outcome {
            Ok(_) => {
                tracing::info!(operation, from, to, "edge updated");
                self.emit(GraphChange::Upserted(vec![from, to]));
            }
            Err(rejection) => {
                tracing::debug!(operation, from, to, %rejection, "edge change rejected")
            }
        }
    }
}

fn check_new_edge(
    conn: &Connection,
    relation: Relation,
    from: TaskId,
    to: TaskId,
) -> AppResult<Guarded<()>> {
    if from == to {
        return Ok(Err(Rejection::SelfEdge));
    }
    let index = GraphIndex::load(conn)?;
    for id in [from, to] {
        if !index.contains(id) {
            return Ok(Err(Rejection::TaskMissing(id)));
        }
    }
    if index.has_edge(relation, from, to) {
        return Ok(Err(Rejection::DuplicateEdge));
    }
    if index.would_cycle(relation, from, to) {
        return Ok(Err(Rejection::WouldCreateCycle));
    }
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{store, task};
    use crate::errors::Rejection;
    use crate::models::{HierarchyEdge, MoveUndo};

    #[test]
    fn closing_a_chain_is_rejected_without_mutation() {
        let (_dir, store) = store();
        let a = task(&store, "A");
        let b = task(&store, "B");
        let c = task(&store, "C");
        store.link(a, b).expect("link").expect("a->b");
        store.link(b, c).expect("link").expect("b->c");

        let before = store.index().expect("index").children_of(c);
        assert_eq!(store.link(c, a).expect("link"), Err(Rejection::WouldCreateCycle));
        assert_eq!(store.link(b, a).expect("link"), Err(Rejection::WouldCreateCycle));
        assert_eq!(store.index().expect("index").children_of(c), before);
        assert!(store.parents_of(a).expect("parents").is_empty());
    }

    #[test]
    fn self_and_duplicate_edges_are_rejected() {
        let (_dir, store) = store();
        let a = task(&store, "A");
        let b = task(&store, "B");
        assert_eq!(store.link(a, a).expect("link"), Err(Rejection::SelfEdge));
        assert_eq!(store.add_dependency(a, a).expect("dep"), Err(Rejection::SelfEdge));
        store.link(a, b).expect("link").expect("first");
        assert_eq!(store.link(a, b).expect("link"), Err(Rejection::DuplicateEdge));
        assert_eq!(store.link(a, 404).expect("link"), Err(Rejection::TaskMissing(404)));
    }

    #[test]
    fn dependency_cycles_are_rejected_and_block() {
        let (_dir, store) = store();
        let a = task(&store, "A");
        let b = task(&store, "B");
        let c = task(&store, "C");
        store.add_dependency(a, b).expect("dep").expect("a needs b");
        store.add_dependency(b, c).expect("dep").expect("b needs c");
        assert_eq!(store.add_dependency(c, a).expect("dep"), Err(Rejection::WouldCreateCycle));

        assert_eq!(store.blocked(&[a, b, c]).expect("blocked"), vec![a, b]);
        store.complete(c).expect("complete").expect("accepted");
        assert_eq!(store.blocked(&[a, b, c]).expect("blocked"), vec![a]);
    }

    #[test]
    fn multi_parent_children_are_not_leaves_of_either_parent() {
        let (_dir, store) = store();
        let p1 = task(&store, "P1");
        let p2 = task(&store, "P2");
        let child = task(&store, "shared");
        store.link(p1, child).expect("link").expect("p1");
        store.link(p2, child).expect("link").expect("p2");

        assert_eq!(store.leaves().expect("leaves"), vec![child]);
        assert_eq!(store.roots().expect("roots"), vec![p1, p2]);
        let parents = store.parents_of(child).expect("parents");
        assert_eq!(parents.len(), 2);
    }

    #[test]
    fn move_swaps_parent_atomically() {
        let (_dir, store) = store();
        let from = task(&store, "from");
        let to = task(&store, "to");
        let item = task(&store, "item");
        store.link(from, item).expect("link").expect("accepted");

        let undo = store.move_task(item, from, to).expect("move").expect("accepted");
        assert_eq!(
            undo,
            MoveUndo {
                task_id: item,
                from_parent_id: from,
                to_parent_id: to
            }
        );
        let index = store.index().expect("index");
        assert_eq!(index.parents_of(item), vec![to]);

        assert_eq!(store.move_task(item, from, to).expect("again"), Err(Rejection::MissingEdge));
        store.link(from, item).expect("link").expect("second parent");
        assert_eq!(store.move_task(item, from, to).expect("dup"), Err(Rejection::DuplicateEdge));
    }

    #[test]
    fn move_under_own_descendant_is_rejected() {
        let (_dir, store) = store();
        let root = task(&store, "root");
        let item = task(&store, "item");
        let below = task(&store, "below");
        store.link(root, item).expect("link").expect("accepted");
        store.link(item, below).expect("link").expect("accepted");

        assert_eq!(
            store.move_task(item, root, below).expect("move"),
            Err(Rejection::WouldCreateCycle)
        );
        let index = store.index().expect("index");
        assert_eq!(index.parents_of(item), vec![root]);
    }

    #[test]
    fn unlink_reports_missing_edges() {
        let (_dir, store) = store();
        let a = task(&store, "A");
        let b = task(&store, "B");
        assert_eq!(store.unlink(a, b).expect("unlink"), Err(Rejection::MissingEdge));
        store.link(a, b).expect("link").expect("accepted");
        assert_eq!(
            store.unlink(a, b).expect("unlink"),
            Ok(HierarchyEdge { parent_id: a, child_id: b })
        );
    }
}
