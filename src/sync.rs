//! Boundary with the remote sync collaborator: a debounced push queue fed by
//! graph changes, and merge-policy application for pulled records.

use crate::errors::AppResult;
use crate::graph::{GraphChange, GraphStore};
use crate::models::{MergePolicy, PullSummary, SyncRecord, TaskId};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Duration;

pub type PushFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type Pusher = Arc<dyn Fn(Vec<SyncRecord>) -> PushFuture + Send + Sync>;

#[derive(Debug, Default)]
struct PendingPush {
    upserts: BTreeSet<TaskId>,
    tombstones: BTreeMap<String, SyncRecord>,
}

impl PendingPush {
    fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.tombstones.is_empty()
    }

    fn absorb(&mut self, other: PendingPush) {
        self.upserts.extend(other.upserts);
        for (sync_id, record) in other.tombstones {
            self.tombstones.entry(sync_id).or_insert(record);
        }
    }
}

#[derive(Clone)]
pub struct SyncQueue {
    store: GraphStore,
    pending: Arc<Mutex<PendingPush>>,
    notify: Arc<Notify>,
    pusher: Arc<RwLock<Option<Pusher>>>,
    debounce: Duration,
}

impl SyncQueue {
    pub fn new(store: GraphStore, debounce: Duration) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(PendingPush::default())),
            notify: Arc::new(Notify::new()),
            pusher: Arc::new(RwLock::new(None)),
            debounce,
        }
    }

    pub fn set_pusher(&self, pusher: Pusher) {
        match self.pusher.write() {
            Ok(mut writer) => *writer = Some(pusher),
            Err(_) => tracing::warn!("sync pusher lock poisoned; pusher not installed"),
        }
    }

    /// Routes every committed graph change into this queue.
    pub fn attach(&self) {
        let pending = self.pending.clone();
        let notify = self.notify.clone();
        self.store.set_change_listener(Arc::new(move |change: &GraphChange| {
            record_change(&pending, change);
            notify.notify_one();
        }));
    }

    pub fn enqueue_ids(&self, ids: impl IntoIterator<Item = TaskId>) {
        with_pending(&self.pending, |pending| pending.upserts.extend(ids));
        self.notify.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        with_pending(&self.pending, |pending| pending.upserts.len() + pending.tombstones.len())
    }

    /// Spawns the flush loop. A flush runs once no change has arrived for the
    /// debounce period.
    pub fn start(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_loop().await;
        });
    }

    async fn run_loop(self) {
        loop {
            self.notify.notified().await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.debounce) => break,
                    _ = self.notify.notified() => continue,
                }
            }
            if let Err(error) = self.flush().await {
                tracing::warn!(error = %error, "sync flush failed");
            }
        }
    }

    /// Pushes everything pending in one batch. Returns the number of records
    /// handed to the pusher; a failed push puts them back in the queue.
    pub async fn flush(&self) -> AppResult<usize> {
        let pusher = match self.pusher.read() {
            Ok(reader) => reader.clone(),
            Err(_) => {
                tracing::warn!("sync pusher lock poisoned; flush skipped");
                return Ok(0);
            }
        };
        let Some(pusher) = pusher else {
            return Ok(0);
        };

        let batch = with_pending(&self.pending, std::mem::take);
        if batch.is_empty() {
            return Ok(0);
        }

        let ids = batch.upserts.iter().copied().collect::<Vec<_>>();
        let mut records = match self.store.sync_records_for(&ids) {
            Ok(records) => records,
            Err(error) => {
                with_pending(&self.pending, |pending| pending.absorb(batch));
                return Err(error);
            }
        };
        records.extend(batch.tombstones.values().cloned());
        let count = records.len();

        match pusher(records).await {
            Ok(()) => {
                tracing::info!(count, "sync push completed");
                Ok(count)
            }
            Err(message) => {
                tracing::warn!(count, error = %message, "sync push failed; records requeued");
                with_pending(&self.pending, |pending| pending.absorb(batch));
                self.notify.notify_one();
                Ok(0)
            }
        }
    }

    /// Merges pulled records into the local graph under `policy` and queues
    /// the local tasks the remote should receive. Pulled changes, deletions
    /// included, are not echoed back.
    pub fn apply_pull(
        &self,
        records: &[SyncRecord],
        policy: MergePolicy,
    ) -> AppResult<PullSummary> {
        let merge = self.store.merge_remote(records, policy)?;
        if !merge.push_back.is_empty() {
            self.enqueue_ids(merge.push_back);
        }
        tracing::info!(?policy, summary = ?merge.summary, "sync pull applied");
        Ok(merge.summary)
    }
}

fn record_change(pending: &Mutex<PendingPush>, change: &GraphChange) {
    with_pending(pending, |pending| match change {
        GraphChange::Upserted(ids) => pending.upserts.extend(ids.iter().copied()),
        GraphChange::Deleted(records) => {
            for record in records {
                pending.tombstones.insert(record.sync_id.clone(), record.clone());
            }
        }
    });
}

fn with_pending<T>(pending: &Mutex<PendingPush>, f: impl FnOnce(&mut PendingPush) -> T) -> T {
    let mut guard = match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}
