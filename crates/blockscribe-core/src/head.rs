//! Head tracker: follows the chain tip and fans every affected block number
//! out to subscribers.
//!
//! On each head sample compared to the previous one:
//! - advance (`new > old`): publish `old+1 ..= new`
//! - regression or repeat (`new <= old`): publish `new ..= old`
//! - first sample: publish just `new`
//!
//! Each subscriber owns a bounded mailbox. Publishing never blocks: a full
//! mailbox drops the number for that subscriber and bumps its drop counter.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chain::{ChainSource, HeadConnector, HeadStream};
use crate::config::HeadTrackerConfig;
use crate::error::IndexerError;
use crate::types::{Head, HeadSource};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Subscriber {
    tx: mpsc::Sender<u64>,
    dropped: u64,
}

/// Head value plus subscriber list; the only state shared with the run task.
struct Shared {
    head: Mutex<Option<Head>>,
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
}

impl Shared {
    fn apply(&self, number: u64, source: HeadSource) {
        let mut head = lock(&self.head);
        let previous = head.replace(Head { number, source });
        let numbers = match previous {
            None => number..=number,
            Some(old) if number > old.number => old.number + 1..=number,
            Some(old) => number..=old.number,
        };
        tracing::trace!(block = number, ?source, "new head");
        // Publish while holding the head lock so concurrent samples stay ordered.
        self.publish(numbers);
    }

    fn publish(&self, numbers: std::ops::RangeInclusive<u64>) {
        let mut subscribers = lock(&self.subscribers);
        for n in numbers {
            subscribers.retain_mut(|sub| match sub.tx.try_send(n) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    tracing::warn!(block = n, dropped = sub.dropped, "head subscriber lagging, dropped block");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }
}

/// Follows the chain head over a push subscription or by polling.
pub struct HeadTracker {
    config: HeadTrackerConfig,
    chain: Arc<dyn ChainSource>,
    connector: Arc<dyn HeadConnector>,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    errors_tx: mpsc::UnboundedSender<IndexerError>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<IndexerError>>>,
}

impl HeadTracker {
    pub fn new(
        config: HeadTrackerConfig,
        chain: Arc<dyn ChainSource>,
        connector: Arc<dyn HeadConnector>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            head: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            capacity: config.subscriber_capacity.max(1),
        });
        Self {
            config,
            chain,
            connector,
            shared,
            shutdown,
            task: Mutex::new(None),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    /// Connect, obtain the first head and start following the chain.
    ///
    /// Returns once the first head has been published.
    pub async fn start(&self) -> Result<(), IndexerError> {
        if lock(&self.task).is_some() {
            return Err(IndexerError::Startup("head tracker already started".into()));
        }

        let stream = self
            .connector
            .connect()
            .await
            .map_err(|e| IndexerError::Startup(format!("head transport: {e}")))?;
        let first = self
            .chain
            .block_number()
            .await
            .map_err(|e| IndexerError::Startup(format!("initial head: {e}")))?;
        self.shared.apply(first, HeadSource::Poll);
        tracing::info!(block = first, push = stream.heads.is_some(), "head tracker started");

        // A previous close leaves the flag raised.
        self.shutdown.send_replace(false);
        let run = RunLoop {
            config: self.config.clone(),
            chain: Arc::clone(&self.chain),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            shutdown: self.shutdown.subscribe(),
            errors: self.errors_tx.clone(),
        };
        *lock(&self.task) = Some(tokio::spawn(run.run(stream)));
        Ok(())
    }

    /// The last known head number (0 before the first sample).
    pub fn best_head(&self) -> u64 {
        self.head().map(|h| h.number).unwrap_or(0)
    }

    /// The last known head.
    pub fn head(&self) -> Option<Head> {
        *lock(&self.shared.head)
    }

    /// Register a new subscriber and return its mailbox.
    pub fn subscribe(&self) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        lock(&self.shared.subscribers).push(Subscriber { tx, dropped: 0 });
        rx
    }

    /// Numbers dropped so far across all live subscribers.
    pub fn dropped(&self) -> u64 {
        lock(&self.shared.subscribers).iter().map(|s| s.dropped).sum()
    }

    /// Steady-state errors (transport failures, failed head queries).
    ///
    /// Can be taken once; later calls return `None`.
    pub fn take_error_feed(&self) -> Option<mpsc::UnboundedReceiver<IndexerError>> {
        lock(&self.errors_rx).take()
    }

    /// Stop following the head. Subscriber mailboxes end once drained.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "head tracker task ended abnormally");
            }
        }
        lock(&self.shared.subscribers).clear();
        tracing::info!("head tracker closed");
    }

    #[cfg(test)]
    pub(crate) fn apply(&self, number: u64, source: HeadSource) {
        self.shared.apply(number, source);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }
}

// ─── Background loop ──────────────────────────────────────────────────────────

enum Ended {
    Shutdown,
    Failed(IndexerError),
}

struct RunLoop {
    config: HeadTrackerConfig,
    chain: Arc<dyn ChainSource>,
    connector: Arc<dyn HeadConnector>,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
    errors: mpsc::UnboundedSender<IndexerError>,
}

impl RunLoop {
    async fn run(mut self, initial: HeadStream) {
        let mut stream = Some(initial);
        loop {
            let current = match stream.take() {
                Some(s) => s,
                None => match self.connector.connect().await {
                    Ok(s) => {
                        // Close the gap left while the transport was down.
                        match self.chain.block_number().await {
                            Ok(n) => self.shared.apply(n, HeadSource::Poll),
                            Err(e) => self.report(e),
                        }
                        s
                    }
                    Err(e) => {
                        self.report(e);
                        if self.backoff().await {
                            return;
                        }
                        continue;
                    }
                },
            };

            let ended = match current.heads {
                Some(heads) => self.follow_push(heads).await,
                None => self.follow_poll().await,
            };
            match ended {
                Ended::Shutdown => return,
                Ended::Failed(e) => {
                    self.report(e);
                    if self.backoff().await {
                        return;
                    }
                }
            }
        }
    }

    async fn follow_push(&mut self, mut heads: mpsc::UnboundedReceiver<u64>) -> Ended {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Ended::Shutdown,
                head = heads.recv() => match head {
                    Some(n) => self.shared.apply(n, HeadSource::Push),
                    None => return Ended::Failed(IndexerError::Rpc("newHeads subscription ended".into())),
                },
            }
        }
    }

    async fn follow_poll(&mut self) -> Ended {
        loop {
            if self.sleep(self.config.poll_interval()).await {
                return Ended::Shutdown;
            }
            match self.chain.block_number().await {
                Ok(n) => self.shared.apply(n, HeadSource::Poll),
                Err(e) => return Ended::Failed(e),
            }
        }
    }

    /// Wait out the reconnect backoff. Returns `true` on shutdown.
    async fn backoff(&mut self) -> bool {
        tracing::warn!(
            backoff_ms = self.config.reconnect_backoff_ms,
            "head transport down, reconnecting"
        );
        self.sleep(self.config.reconnect_backoff()).await
    }

    async fn sleep(&mut self, duration: std::time::Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    fn report(&self, e: IndexerError) {
        tracing::error!(error = %e, "head tracker error");
        let _ = self.errors.send(e);
    }
}
