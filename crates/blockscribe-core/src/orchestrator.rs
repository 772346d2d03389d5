//! The indexer: ties head tracking, the task queue, fetching, validation and
//! storage into one serial processing loop.
//!
//! ```text
//! HeadTracker ──heads──▶ TaskQueue ──dequeue──▶ fetch ─▶ validate ─▶ transform+store
//!                          ▲                                   │ failure
//!                          └──────────── re-enqueue ◀──────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain::{ChainSource, HeadConnector};
use crate::config::{IndexerConfig, IndexerState};
use crate::error::IndexerError;
use crate::fetcher::BlockFetcher;
use crate::head::HeadTracker;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::{QueueStore, TaskQueue};
use crate::storage::{BlockStore, StoreOutcome};
use crate::transform::BlockRows;
use crate::types::Head;
use crate::validator::{BlockValidator, StructuralValidator};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    config: IndexerConfig,
    tracker: HeadTracker,
    queue: TaskQueue,
    fetcher: BlockFetcher,
    validator: Box<dyn BlockValidator>,
    store: Arc<dyn BlockStore>,
    metrics: Metrics,
    /// Held while a block is processed; shutdown and reset take it too.
    processing: tokio::sync::Mutex<()>,
    state: Mutex<IndexerState>,
    shutdown: watch::Sender<bool>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    /// Head metrics recorder and error-feed logger.
    side_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A running (or startable) block indexer. Cheap to clone.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        chain: Arc<dyn ChainSource>,
        connector: Arc<dyn HeadConnector>,
        queue_store: Arc<dyn QueueStore>,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        Self::with_validator(
            config,
            chain,
            connector,
            queue_store,
            store,
            Box::new(StructuralValidator),
        )
    }

    pub fn with_validator(
        config: IndexerConfig,
        chain: Arc<dyn ChainSource>,
        connector: Arc<dyn HeadConnector>,
        queue_store: Arc<dyn QueueStore>,
        store: Arc<dyn BlockStore>,
        validator: Box<dyn BlockValidator>,
    ) -> Self {
        let tracker = HeadTracker::new(config.head.clone(), Arc::clone(&chain), connector);
        let queue = TaskQueue::new(queue_store, config.queue.clone(), config.features.clone());
        let fetcher = BlockFetcher::new(chain, config.features.uncles);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                tracker,
                queue,
                fetcher,
                validator,
                store,
                metrics: Metrics::new(),
                processing: tokio::sync::Mutex::new(()),
                state: Mutex::new(IndexerState::Idle),
                shutdown,
                run_task: Mutex::new(None),
                side_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start head tracking, seed the backfill and spawn the processing loop.
    ///
    /// Fails if the node or the store cannot be reached.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        if self.state() != IndexerState::Idle {
            return Err(IndexerError::Startup(format!(
                "indexer is {}, expected idle",
                self.state()
            )));
        }

        // Subscribe before starting so the first head reaches the queue.
        inner.queue.watch_heads(inner.tracker.subscribe());
        let mut heads = inner.tracker.subscribe();
        let started = match inner.tracker.start().await {
            Ok(()) => self.seed_backfill().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            inner.queue.stop_watching();
            inner.tracker.close().await;
            *lock(&inner.state) = IndexerState::Idle;
            return Err(e);
        }

        let mut tasks = Vec::new();
        let metrics_inner = Arc::clone(inner);
        tasks.push(tokio::spawn(async move {
            while let Some(n) = heads.recv().await {
                metrics_inner.metrics.record_latest_block(n);
            }
        }));
        if let Some(mut errors) = inner.tracker.take_error_feed() {
            tasks.push(tokio::spawn(async move {
                while let Some(e) = errors.recv().await {
                    tracing::warn!(error = %e, "head tracker reported an error");
                }
            }));
        }
        lock(&inner.side_tasks).extend(tasks);

        *lock(&inner.state) = IndexerState::Running;
        *lock(&inner.run_task) = Some(tokio::spawn(Self::run(Arc::clone(inner))));
        tracing::info!("indexer started");
        Ok(())
    }

    /// Enqueue everything between the stored tip and the lagged head once.
    async fn seed_backfill(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        let stored_max = inner
            .store
            .highest_block()
            .await
            .map_err(|e| IndexerError::Startup(format!("highest stored block: {e}")))?
            .unwrap_or(0);
        let best = inner.tracker.best_head();
        tracing::info!(stored = stored_max, head = best, "starting from stored tip");

        if !inner.config.features.backfill {
            tracing::info!("backfill disabled, skipping");
            return Ok(());
        }
        let Some(target) = best.checked_sub(inner.config.features.lag()) else {
            return Ok(());
        };
        if stored_max + 1 < target {
            tracing::info!(from = stored_max, to = target, "backfilling");
            for n in stored_max..=target {
                inner
                    .queue
                    .enqueue(n)
                    .await
                    .map_err(|e| IndexerError::Startup(format!("seeding block {n}: {e}")))?;
            }
        }
        Ok(())
    }

    async fn run(inner: Arc<Inner>) {
        let mut shutdown = inner.shutdown.subscribe();
        loop {
            let stop = async {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            let block = tokio::select! {
                _ = stop => break,
                next = inner.queue.dequeue() => match next {
                    Some(n) => n,
                    None => break,
                },
            };
            match inner.queue.len().await {
                Ok(len) => inner.metrics.record_queue_length(len),
                Err(e) => tracing::debug!(error = %e, "queue length unavailable"),
            }

            let guard = inner.processing.lock().await;
            if *shutdown.borrow() {
                inner.requeue(block).await;
                break;
            }
            let processed = inner.process(block).await;
            drop(guard);

            if let Err(e) = processed {
                tracing::warn!(block, error = %e, "block failed, re-enqueueing");
                inner.requeue(block).await;
                let stop = async {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                };
                tokio::select! {
                    _ = stop => break,
                    _ = tokio::time::sleep(inner.config.retry_pause()) => {}
                }
            }
        }
        tracing::debug!("processing loop finished");
    }

    // ─── Control surface ──────────────────────────────────────────────────────

    /// Schedule `number` for (re)processing.
    pub async fn enqueue(&self, number: u64) -> Result<(), IndexerError> {
        self.inner.queue.enqueue(number).await
    }

    /// Suspend processing. Returns once no new block will be dequeued.
    pub async fn pause(&self) {
        self.inner.queue.pause().await;
        let mut state = lock(&self.inner.state);
        if *state == IndexerState::Running {
            *state = IndexerState::Paused;
        }
    }

    pub fn resume(&self) {
        self.inner.queue.resume();
        let mut state = lock(&self.inner.state);
        if *state == IndexerState::Paused {
            *state = IndexerState::Running;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.queue.is_paused()
    }

    /// Clear the queue, every stored row and the metrics.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        let _guard = inner.processing.lock().await;
        inner.queue.reset().await?;
        inner.store.reset().await?;
        inner.metrics.reset();
        inner.metrics.record_latest_block(inner.tracker.best_head());
        tracing::info!("indexer reset");
        Ok(())
    }

    pub fn head(&self) -> Option<Head> {
        self.inner.tracker.head()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn state(&self) -> IndexerState {
        *lock(&self.inner.state)
    }

    /// Stop processing and release every connection.
    ///
    /// Waits for the block in flight. Gives the queue up to the shutdown
    /// timeout to wind down, then logs and returns.
    pub async fn close(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.state);
            if matches!(*state, IndexerState::Stopping | IndexerState::Stopped) {
                return Ok(());
            }
            *state = IndexerState::Stopping;
        }
        tracing::info!("shutting down");

        inner.queue.pause().await;
        inner.shutdown.send_replace(true);
        // Wait for the block in flight.
        drop(inner.processing.lock().await);

        let run_task = lock(&inner.run_task).take();
        if let Some(task) = run_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "processing loop ended abnormally");
            }
        }

        inner.tracker.close().await;
        tracing::info!("closed head tracker");

        let store_closed = inner.store.close().await;
        tracing::info!("closed block store");

        match tokio::time::timeout(inner.config.shutdown_timeout(), inner.queue.close()).await {
            Ok(Ok(())) => tracing::info!("closed task queue"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to close task queue"),
            Err(_) => tracing::warn!(
                timeout_ms = inner.config.shutdown_timeout_ms,
                "could not close task queue, exiting uncleanly"
            ),
        }

        for task in lock(&inner.side_tasks).drain(..) {
            task.abort();
        }
        *lock(&inner.state) = IndexerState::Stopped;
        store_closed
    }
}

impl Inner {
    /// Fetch, validate and store one block.
    ///
    /// Errors leave the block unstored; the caller re-enqueues it.
    async fn process(&self, block: u64) -> Result<StoreOutcome, IndexerError> {
        let start = Instant::now();
        tracing::info!(block, "processing block");

        let full = self.fetcher.fetch(block).await?;
        self.metrics.record_scraping_time(start.elapsed());

        if let Err(source) = self.validator.validate(&full) {
            self.metrics.record_invalid_block();
            return Err(IndexerError::Validation {
                block_number: block,
                source,
            });
        }

        let indexing = Instant::now();
        let rows = BlockRows::from_full_block(&full)?;
        let outcome = self.store.store(&rows).await?;

        match outcome {
            StoreOutcome::Replaced => {
                self.metrics.record_reorged_block();
                self.metrics.record_stored_block();
                tracing::warn!(block, hash = rows.hash(), "reorg: replaced stored block");
            }
            StoreOutcome::Inserted => self.metrics.record_stored_block(),
            StoreOutcome::AlreadyStored => tracing::debug!(block, "block already stored"),
        }
        self.metrics.record_indexing_time(indexing.elapsed());
        self.metrics.record_processing_time(start.elapsed());
        tracing::info!(
            block,
            ?outcome,
            duration_ms = start.elapsed().as_millis() as u64,
            "done processing block"
        );
        Ok(outcome)
    }

    async fn requeue(&self, block: u64) {
        if let Err(e) = self.queue.enqueue(block).await {
            tracing::error!(block, error = %e, "could not re-enqueue block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerBuilder;
    use crate::queue::MemoryQueueStore;
    use crate::storage::MemoryBlockStore;
    use crate::testing::{full_block, MockChain, MockConnector};
    use std::time::Duration;

    fn builder() -> IndexerBuilder {
        IndexerBuilder::new()
            .poll_interval_ms(60_000)
            .pop_timeout_ms(20)
            .retry_pause_ms(10)
            .shutdown_timeout_ms(1_000)
    }

    struct Harness {
        chain: Arc<MockChain>,
        store: Arc<MemoryBlockStore>,
        queue: Arc<MemoryQueueStore>,
        indexer: Indexer,
    }

    fn harness(config: IndexerConfig, chain: MockChain, store: MemoryBlockStore) -> Harness {
        let chain = Arc::new(chain);
        let store = Arc::new(store);
        let queue = Arc::new(MemoryQueueStore::new());
        let indexer = Indexer::new(
            config,
            chain.clone(),
            Arc::new(MockConnector::polling()),
            queue.clone(),
            store.clone(),
        );
        Harness {
            chain,
            store,
            queue,
            indexer,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn stored(store: &MemoryBlockStore, number: u64, seed: u64) {
        let rows = BlockRows::from_full_block(&full_block(number, seed, 1, 0)).unwrap();
        store.store(&rows).await.unwrap();
    }

    #[tokio::test]
    async fn startup_backfills_from_stored_tip_to_lagged_head() {
        let chain = MockChain::new();
        chain.set_head(60);
        for n in 50..=60 {
            chain.insert(full_block(n, n, 1, 0));
        }
        let store = MemoryBlockStore::new();
        stored(&store, 50, 50).await;

        let h = harness(builder().lag(5).build_config(), chain, store);
        h.indexer.start().await.unwrap();
        assert_eq!(h.indexer.state(), IndexerState::Running);

        eventually(|| h.store.numbers() == (50..=55).collect::<Vec<_>>()).await;
        h.indexer.close().await.unwrap();

        assert_eq!(h.store.numbers(), (50..=55).collect::<Vec<_>>());
        assert!(!h.chain.block_requests().contains(&56));
        assert_eq!(h.indexer.state(), IndexerState::Stopped);
    }

    #[tokio::test]
    async fn failed_fetch_is_redelivered() {
        let chain = MockChain::new();
        chain.set_head(42);
        for n in 39..=42 {
            chain.insert(full_block(n, n, 2, 0));
        }
        chain.fail_block(42, 1);
        let store = MemoryBlockStore::new();
        stored(&store, 39, 39).await;

        let h = harness(builder().build_config(), chain, store);
        h.indexer.start().await.unwrap();

        eventually(|| h.store.numbers() == vec![39, 40, 41, 42]).await;
        let requests_for_42 = h.chain.block_requests().iter().filter(|n| **n == 42).count();
        assert!(requests_for_42 >= 2);
        assert_eq!(h.indexer.metrics().stored_blocks, 3);
        h.indexer.close().await.unwrap();
    }

    #[tokio::test]
    async fn reorged_block_is_replaced() {
        let chain = MockChain::new();
        chain.set_head(45);
        chain.insert(full_block(45, 2, 1, 0));
        let store = MemoryBlockStore::new();
        stored(&store, 45, 1).await;

        let h = harness(builder().build_config(), chain, store);
        h.indexer.start().await.unwrap();

        let replacement = BlockRows::from_full_block(&full_block(45, 2, 1, 0)).unwrap();
        eventually(|| h.store.get(45).as_ref() == Some(&replacement)).await;
        eventually(|| h.indexer.metrics().reorged_blocks == 1).await;
        h.indexer.close().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_block_is_counted_and_not_stored() {
        let chain = MockChain::new();
        chain.set_head(8);
        let mut bad = full_block(8, 8, 2, 0);
        bad.block.gas_used = "0x1".into();
        chain.insert(bad);

        let h = harness(builder().backfill(false).build_config(), chain, MemoryBlockStore::new());
        h.indexer.start().await.unwrap();

        eventually(|| h.indexer.metrics().invalid_blocks >= 1).await;
        h.indexer.close().await.unwrap();
        assert!(h.store.get(8).is_none());
        // Still scheduled for a later attempt.
        assert_eq!(h.queue.entries(), vec![8]);
    }

    #[tokio::test]
    async fn pause_holds_blocks_until_resume() {
        let chain = MockChain::new();
        chain.set_head(3);
        for n in 1..=5 {
            chain.insert(full_block(n, n, 0, 0));
        }
        let h = harness(builder().backfill(false).build_config(), chain, MemoryBlockStore::new());
        h.indexer.start().await.unwrap();
        eventually(|| h.store.numbers() == vec![3]).await;

        h.indexer.pause().await;
        assert!(h.indexer.is_paused());
        assert_eq!(h.indexer.state(), IndexerState::Paused);
        h.indexer.enqueue(5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.store.numbers(), vec![3]);

        h.indexer.resume();
        eventually(|| h.store.numbers() == vec![3, 5]).await;
        h.indexer.close().await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_store_queue_and_metrics() {
        let chain = MockChain::new();
        chain.set_head(2);
        chain.insert(full_block(2, 2, 0, 0));
        let h = harness(builder().backfill(false).build_config(), chain, MemoryBlockStore::new());
        h.indexer.start().await.unwrap();
        eventually(|| h.store.numbers() == vec![2]).await;

        h.indexer.pause().await;
        h.indexer.enqueue(1).await.unwrap();
        h.indexer.reset().await.unwrap();

        assert!(h.store.numbers().is_empty());
        assert!(h.queue.entries().is_empty());
        let metrics = h.indexer.metrics();
        assert_eq!(metrics.stored_blocks, 0);
        assert_eq!(metrics.latest_block, 2);
        h.indexer.close().await.unwrap();
    }

    #[tokio::test]
    async fn start_fails_without_node() {
        let chain = MockChain::new();
        chain.fail_head(true);
        chain.insert(full_block(3, 3, 1, 0));
        let h = harness(builder().backfill(false).build_config(), chain, MemoryBlockStore::new());
        assert!(matches!(h.indexer.start().await, Err(IndexerError::Startup(_))));

        let inner = &h.indexer.inner;
        assert_eq!(h.indexer.state(), IndexerState::Idle);
        assert!(lock(&inner.side_tasks).is_empty());
        assert!(!inner.queue.is_watching());
        assert_eq!(inner.tracker.subscriber_count(), 0);

        // Node comes back; a second start runs normally.
        h.chain.fail_head(false);
        h.chain.set_head(3);
        h.indexer.start().await.unwrap();
        assert_eq!(h.indexer.state(), IndexerState::Running);
        eventually(|| h.store.numbers() == vec![3]).await;
        eventually(|| h.indexer.metrics().latest_block == 3).await;
        h.indexer.close().await.unwrap();
    }

    /// Block store that cannot report its tip.
    struct TiplessStore;

    #[async_trait::async_trait]
    impl BlockStore for TiplessStore {
        async fn highest_block(&self) -> Result<Option<u64>, IndexerError> {
            Err(IndexerError::Storage("connection refused".into()))
        }

        async fn store(&self, _rows: &BlockRows) -> Result<StoreOutcome, IndexerError> {
            Ok(StoreOutcome::Inserted)
        }

        async fn reset(&self) -> Result<(), IndexerError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_backfill_seed_stops_everything_started() {
        let chain = Arc::new(MockChain::new());
        chain.set_head(10);
        let indexer = Indexer::new(
            builder().build_config(),
            chain,
            Arc::new(MockConnector::polling()),
            Arc::new(MemoryQueueStore::new()),
            Arc::new(TiplessStore),
        );
        assert!(matches!(indexer.start().await, Err(IndexerError::Startup(_))));

        let inner = &indexer.inner;
        assert_eq!(indexer.state(), IndexerState::Idle);
        assert!(lock(&inner.side_tasks).is_empty());
        assert!(lock(&inner.run_task).is_none());
        assert!(!inner.queue.is_watching());
        assert_eq!(inner.tracker.subscriber_count(), 0);
        // The error feed was never handed out, so a later start still gets it.
        assert!(inner.tracker.take_error_feed().is_some());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let chain = MockChain::new();
        chain.set_head(1);
        let h = harness(builder().backfill(false).build_config(), chain, MemoryBlockStore::new());
        h.indexer.start().await.unwrap();
        h.indexer.close().await.unwrap();
        h.indexer.close().await.unwrap();
        assert_eq!(h.indexer.state(), IndexerState::Stopped);
        assert_eq!(h.indexer.head().map(|h| h.number), Some(1));
    }
}
