use dag_daily_planner_lib::db::Database;
use dag_daily_planner_lib::graph::GraphStore;
use dag_daily_planner_lib::models::{CreateTaskPayload, Task};
use dag_daily_planner_lib::Rejection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type Snapshot = (Vec<Task>, BTreeSet<(i64, i64)>, BTreeSet<(i64, i64)>);

fn open_store() -> (tempfile::TempDir, GraphStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(&dir.path().join("state.sqlite")).expect("open db");
    (dir, GraphStore::new(Arc::new(db)))
}

fn add(store: &GraphStore, name: &str) -> i64 {
    store
        .create_task(CreateTaskPayload {
            name: name.to_string(),
            ..CreateTaskPayload::default()
        })
        .expect("create")
        .expect("accepted")
        .id
}

fn snapshot(store: &GraphStore) -> Snapshot {
    let tasks = store.list_tasks(false).expect("tasks");
    let index = store.index().expect("index");
    let mut links = BTreeSet::new();
    let mut dependencies = BTreeSet::new();
    for task in &tasks {
        for child in index.children_of(task.id) {
            links.insert((task.id, child));
        }
        for target in index.depends_on(task.id) {
            dependencies.insert((task.id, target));
        }
    }
    (tasks, links, dependencies)
}

/// Diamond with a shared child, a dependency web and one completed task.
fn build_fixture(store: &GraphStore) -> HashMap<&'static str, i64> {
    let names = ["root", "left", "right", "shared", "deep", "other", "done"];
    let ids = names
        .iter()
        .map(|name| (*name, add(store, name)))
        .collect::<HashMap<_, _>>();
    for (parent, child) in [
        ("root", "left"),
        ("root", "right"),
        ("left", "shared"),
        ("right", "shared"),
        ("shared", "deep"),
        ("other", "done"),
    ] {
        store.link(ids[parent], ids[child]).expect("link").expect("accepted");
    }
    for (task, target) in [("deep", "other"), ("left", "right"), ("done", "shared")] {
        store
            .add_dependency(ids[task], ids[target])
            .expect("dependency")
            .expect("accepted");
    }
    store.complete(ids["done"]).expect("complete").expect("accepted");
    ids
}

#[test]
fn every_delete_mode_round_trips_through_restore() {
    for mode in ["only", "reparent", "subtree"] {
        for target in ["root", "left", "shared", "deep", "done"] {
            let (_dir, store) = open_store();
            let ids = build_fixture(&store);
            let before = snapshot(&store);

            let undo = match mode {
                "only" => store.delete_only(ids[target]),
                "reparent" => store.delete_and_reparent(ids[target]),
                _ => store.delete_subtree(ids[target]),
            }
            .expect("delete")
            .expect("accepted");
            assert_ne!(snapshot(&store), before, "{} {} changed nothing", mode, target);

            store.restore_deleted(&undo).expect("restore").expect("accepted");
            assert_eq!(snapshot(&store), before, "{} {} did not round-trip", mode, target);
        }
    }
}

#[test]
fn reparent_never_orphans_former_children() {
    let (_dir, store) = open_store();
    let ids = build_fixture(&store);

    store
        .delete_and_reparent(ids["shared"])
        .expect("delete")
        .expect("accepted");
    let index = store.index().expect("index");
    assert_eq!(index.parents_of(ids["deep"]), vec![ids["left"], ids["right"]]);

    store.delete_and_reparent(ids["root"]).expect("delete").expect("accepted");
    let index = store.index().expect("index");
    assert!(index.parents_of(ids["left"]).is_empty());
    assert!(index.roots().contains(&ids["left"]));
    assert!(index.roots().contains(&ids["right"]));
}

#[test]
fn subtree_delete_leaves_sibling_branch_untouched() {
    let (_dir, store) = open_store();
    let root = add(&store, "root");
    let mid = add(&store, "mid");
    let leaf = add(&store, "leaf");
    let sibling = add(&store, "sibling");
    let sibling_child = add(&store, "sibling child");
    store.link(root, mid).expect("link").expect("accepted");
    store.link(mid, leaf).expect("link").expect("accepted");
    store.link(sibling, sibling_child).expect("link").expect("accepted");
    store.add_dependency(leaf, sibling_child).expect("dep").expect("accepted");

    let undo = store.delete_subtree(root).expect("delete").expect("accepted");
    let mut removed = undo.removed_ids();
    removed.sort_unstable();
    assert_eq!(removed, vec![root, mid, leaf]);

    let (tasks, links, dependencies) = snapshot(&store);
    assert_eq!(tasks.iter().map(|task| task.id).collect::<Vec<_>>(), vec![sibling, sibling_child]);
    assert_eq!(links, BTreeSet::from([(sibling, sibling_child)]));
    assert!(dependencies.is_empty());
}

#[test]
fn chain_closing_link_is_rejected() {
    let (_dir, store) = open_store();
    let a = add(&store, "A");
    let b = add(&store, "B");
    let c = add(&store, "C");
    store.link(a, b).expect("link").expect("accepted");
    store.link(b, c).expect("link").expect("accepted");

    let before = snapshot(&store);
    assert_eq!(store.link(c, a).expect("link"), Err(Rejection::WouldCreateCycle));
    assert_eq!(snapshot(&store), before);
}

fn is_acyclic(nodes: &[i64], edges: &BTreeSet<(i64, i64)>) -> bool {
    let mut incoming = nodes.iter().map(|id| (*id, 0usize)).collect::<HashMap<_, _>>();
    for (_, to) in edges {
        *incoming.entry(*to).or_default() += 1;
    }
    let mut ready = incoming
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect::<Vec<_>>();
    let mut visited = 0;
    while let Some(id) = ready.pop() {
        visited += 1;
        for (_, to) in edges.iter().filter(|(from, _)| *from == id) {
            if let Some(count) = incoming.get_mut(to) {
                *count -= 1;
                if *count == 0 {
                    ready.push(*to);
                }
            }
        }
    }
    visited == incoming.len()
}

#[test]
fn random_edge_sequences_stay_acyclic() {
    let (_dir, store) = open_store();
    let ids = (0..10).map(|n| add(&store, &format!("task {}", n))).collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(2024);
    let mut rejected_cycles = 0;

    for _ in 0..150 {
        let from = ids[rng.random_range(0..ids.len())];
        let to = ids[rng.random_range(0..ids.len())];
        let outcome = if rng.random::<bool>() {
            store.link(from, to).expect("link").map(|_| ())
        } else {
            store.add_dependency(from, to).expect("dependency").map(|_| ())
        };
        if outcome == Err(Rejection::WouldCreateCycle) {
            rejected_cycles += 1;
        }
    }

    let (_, links, dependencies) = snapshot(&store);
    assert!(is_acyclic(&ids, &links));
    assert!(is_acyclic(&ids, &dependencies));
    assert!(rejected_cycles > 0);
}
