//! Durable priority queue of block numbers to process, highest first.
//!
//! Entries live in a [`QueueStore`] (a sorted set keyed by block number).
//! Pause and resume travel over a control channel next to the data, so a
//! paused queue never hands out a number even if one was already popped.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::{Features, QueueConfig};
use crate::error::IndexerError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sorted-set storage behind the task queue.
///
/// Implementations include `MemoryQueueStore` and the SQL-backed stores in
/// `blockscribe-storage`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `number`; a number already present is left as is.
    async fn upsert(&self, number: u64) -> Result<(), IndexerError>;

    /// Remove and return the highest number, waiting up to `wait` for one.
    async fn pop_max(&self, wait: Duration) -> Result<Option<u64>, IndexerError>;

    async fn len(&self) -> Result<u64, IndexerError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), IndexerError>;

    /// Release connections.
    async fn close(&self) -> Result<(), IndexerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory queue store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryQueueStore {
    entries: Mutex<BTreeSet<u64>>,
    notify: Notify,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entries, highest first.
    pub fn entries(&self) -> Vec<u64> {
        lock(&self.entries).iter().rev().copied().collect()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn upsert(&self, number: u64) -> Result<(), IndexerError> {
        lock(&self.entries).insert(number);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_max(&self, wait: Duration) -> Result<Option<u64>, IndexerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(n) = lock(&self.entries).pop_last() {
                return Ok(Some(n));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<u64, IndexerError> {
        Ok(lock(&self.entries).len() as u64)
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        lock(&self.entries).clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

// ─── Backfill cursor ──────────────────────────────────────────────────────────

/// Tracks the last number enqueued from the head feed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillCursor {
    last_enqueued: Option<u64>,
}

impl BackfillCursor {
    /// Numbers to enqueue for a head announcement.
    ///
    /// With backfill on, everything after the cursor up to `head - lag` is
    /// returned. The first announcement, or a target at or below the cursor
    /// (a regression), yields just the target. Heads below the lag yield
    /// nothing. The cursor itself only moves through [`advance`](Self::advance).
    pub fn plan(&self, head: u64, features: &Features) -> Option<RangeInclusive<u64>> {
        let target = head.checked_sub(features.lag())?;
        let from = match self.last_enqueued {
            Some(last) if features.backfill && target > last => last + 1,
            _ => target,
        };
        Some(from..=target)
    }

    /// Record that `number` is safely in the queue.
    pub fn advance(&mut self, number: u64) {
        self.last_enqueued = Some(number);
    }

    pub fn last_enqueued(&self) -> Option<u64> {
        self.last_enqueued
    }

    /// Rewind to before genesis.
    pub fn reset(&mut self) {
        self.last_enqueued = None;
    }
}

// ─── TaskQueue ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopped,
}

enum Pop {
    Delivered(u64),
    Empty,
    Failed,
}

/// Counts one pop in flight for as long as it lives.
struct PopGuard(Arc<watch::Sender<usize>>);

impl PopGuard {
    fn enter(popping: &Arc<watch::Sender<usize>>) -> Self {
        popping.send_modify(|n| *n += 1);
        Self(Arc::clone(popping))
    }
}

impl Drop for PopGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

/// Receiving end of a pop task. Dropping it before the outcome is read hands
/// a delivered number back to the store.
struct PendingPop {
    rx: oneshot::Receiver<Pop>,
    store: Arc<dyn QueueStore>,
}

impl PendingPop {
    async fn outcome(&mut self) -> Pop {
        (&mut self.rx).await.unwrap_or(Pop::Failed)
    }
}

impl Drop for PendingPop {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(Pop::Delivered(n)) = self.rx.try_recv() {
            let store = Arc::clone(&self.store);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { put_back(store.as_ref(), n).await });
                }
                Err(_) => tracing::error!(block = n, "no runtime to return block to queue"),
            }
        }
    }
}

async fn put_back(store: &dyn QueueStore, n: u64) {
    if let Err(e) = store.upsert(n).await {
        tracing::error!(block = n, error = %e, "failed to return block to queue");
    }
}

/// Priority queue of pending block numbers with pause/resume.
pub struct TaskQueue {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    features: Features,
    control: watch::Sender<Control>,
    /// Number of pops currently running against the store.
    popping: Arc<watch::Sender<usize>>,
    cursor: Arc<Mutex<BackfillCursor>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig, features: Features) -> Self {
        let (control, _) = watch::channel(Control::Running);
        let (popping, _) = watch::channel(0);
        Self {
            store,
            config,
            features,
            control,
            popping: Arc::new(popping),
            cursor: Arc::new(Mutex::new(BackfillCursor::default())),
            watcher: Mutex::new(None),
        }
    }

    /// Add `number` to the queue. Enqueuing a number twice keeps one entry.
    pub async fn enqueue(&self, number: u64) -> Result<(), IndexerError> {
        tracing::trace!(block = number, "enqueue");
        self.store.upsert(number).await
    }

    /// Wait for the highest pending number.
    ///
    /// Blocks while the queue is empty or paused. Returns `None` once the
    /// queue is closed. Cancel-safe: a number popped for a dropped call goes
    /// back into the store.
    pub async fn dequeue(&self) -> Option<u64> {
        let mut control = self.control.subscribe();
        loop {
            let state = *control.borrow_and_update();
            match state {
                Control::Stopped => return None,
                Control::Paused => {
                    if control.changed().await.is_err() {
                        return None;
                    }
                    continue;
                }
                Control::Running => {}
            }

            let mut pending = self.spawn_pop();
            match pending.outcome().await {
                Pop::Delivered(n) => return Some(n),
                Pop::Empty => {}
                Pop::Failed => {
                    if !self.is_closed() {
                        tokio::time::sleep(self.config.pop_timeout()).await;
                    }
                }
            }
        }
    }

    /// Run one `pop_max` on its own task so dropping the caller cannot
    /// abandon a popped number or leave `popping` raised.
    fn spawn_pop(&self) -> PendingPop {
        let store = Arc::clone(&self.store);
        let control = self.control.subscribe();
        let wait = self.config.pop_timeout();
        let guard = PopGuard::enter(&self.popping);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let _guard = guard;
            let popped = store.pop_max(wait).await;
            let state = *control.borrow();
            let outcome = match popped {
                Ok(Some(n)) if state == Control::Running => Pop::Delivered(n),
                Ok(Some(n)) => {
                    // Paused or closed mid-pop.
                    put_back(store.as_ref(), n).await;
                    Pop::Empty
                }
                Ok(None) => Pop::Empty,
                Err(e) => {
                    if state != Control::Stopped {
                        tracing::warn!(error = %e, "queue pop failed");
                    }
                    Pop::Failed
                }
            };
            if let Err(Pop::Delivered(n)) = tx.send(outcome) {
                put_back(store.as_ref(), n).await;
            }
        });

        PendingPop {
            rx,
            store: Arc::clone(&self.store),
        }
    }

    /// Suspend delivery. Returns once no dequeue is inside a pop, so no
    /// number is handed out until `resume`.
    pub async fn pause(&self) {
        let changed = self.control.send_if_modified(|c| {
            if *c == Control::Running {
                *c = Control::Paused;
                true
            } else {
                false
            }
        });
        let mut popping = self.popping.subscribe();
        let _ = popping.wait_for(|n| *n == 0).await;
        if changed {
            tracing::info!("queue paused");
        }
    }

    /// Continue delivery after `pause`.
    pub fn resume(&self) {
        let changed = self.control.send_if_modified(|c| {
            if *c == Control::Paused {
                *c = Control::Running;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("queue resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == Control::Paused
    }

    pub fn is_closed(&self) -> bool {
        *self.control.borrow() == Control::Stopped
    }

    /// Drop every pending number and rewind the backfill cursor.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.store.clear().await?;
        lock(&self.cursor).reset();
        tracing::info!("queue reset");
        Ok(())
    }

    pub async fn len(&self) -> Result<u64, IndexerError> {
        self.store.len().await
    }

    /// Stop delivering, wait for in-flight pops and release the store.
    pub async fn close(&self) -> Result<(), IndexerError> {
        self.control.send_replace(Control::Stopped);
        self.stop_watching();
        let mut popping = self.popping.subscribe();
        let _ = popping.wait_for(|n| *n == 0).await;
        self.store.close().await?;
        tracing::info!("queue closed");
        Ok(())
    }

    /// Feed head announcements into the queue (see [`BackfillCursor::plan`]).
    ///
    /// Announcements that arrive while the queue is paused are skipped. The
    /// cursor advances past a number only once it is stored; a failed upsert
    /// ends the range so the next announcement starts over from there.
    pub fn watch_heads(&self, mut heads: mpsc::Receiver<u64>) {
        let store = Arc::clone(&self.store);
        let cursor = Arc::clone(&self.cursor);
        let control = self.control.subscribe();
        let features = self.features.clone();

        let task = tokio::spawn(async move {
            while let Some(head) = heads.recv().await {
                let state = *control.borrow();
                match state {
                    Control::Stopped => break,
                    Control::Paused => {
                        tracing::debug!(block = head, "queue paused, skipping head");
                        continue;
                    }
                    Control::Running => {}
                }
                let Some(range) = lock(&cursor).plan(head, &features) else {
                    continue;
                };
                for n in range {
                    if let Err(e) = store.upsert(n).await {
                        tracing::error!(block = n, head, error = %e, "failed to enqueue block, retrying on next head");
                        break;
                    }
                    lock(&cursor).advance(n);
                }
            }
            tracing::debug!("head watcher finished");
        });

        if let Some(previous) = lock(&self.watcher).replace(task) {
            previous.abort();
        }
    }

    /// Stop feeding head announcements into the queue.
    pub fn stop_watching(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_watching(&self) -> bool {
        lock(&self.watcher).as_ref().is_some_and(|w| !w.is_finished())
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> BackfillCursor {
        lock(&self.cursor).clone()
    }
}
