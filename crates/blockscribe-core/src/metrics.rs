//! Pipeline metrics: counters plus running averages of per-block timings.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cumulative moving average of durations.
#[derive(Debug, Default, Clone, Copy)]
pub struct RollingAverage {
    avg_nanos: f64,
    samples: u64,
}

impl RollingAverage {
    pub fn add(&mut self, sample: Duration) {
        self.samples += 1;
        self.avg_nanos += (sample.as_nanos() as f64 - self.avg_nanos) / self.samples as f64;
    }

    pub fn average(&self) -> Duration {
        Duration::from_nanos(self.avg_nanos.round() as u64)
    }

    /// Average rounded to whole milliseconds.
    pub fn millis(&self) -> u64 {
        (self.avg_nanos / 1_000_000.0).round() as u64
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[derive(Debug, Default)]
struct Counters {
    processing: RollingAverage,
    scraping: RollingAverage,
    indexing: RollingAverage,
    latest_block: u64,
    queue_length: u64,
    reorged_blocks: u64,
    invalid_blocks: u64,
    stored_blocks: u64,
}

/// Point-in-time view of the indexer's metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub latest_block: u64,
    pub queue_length: u64,
    pub reorged_blocks: u64,
    pub invalid_blocks: u64,
    pub stored_blocks: u64,
    pub avg_processing_ms: u64,
    pub avg_scraping_ms: u64,
    pub avg_indexing_ms: u64,
}

/// Shared metrics cell.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<Counters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_processing_time(&self, d: Duration) {
        self.lock().processing.add(d);
    }

    pub fn record_scraping_time(&self, d: Duration) {
        self.lock().scraping.add(d);
    }

    pub fn record_indexing_time(&self, d: Duration) {
        self.lock().indexing.add(d);
    }

    pub fn record_latest_block(&self, n: u64) {
        self.lock().latest_block = n;
    }

    pub fn record_queue_length(&self, len: u64) {
        self.lock().queue_length = len;
    }

    pub fn record_reorged_block(&self) {
        self.lock().reorged_blocks += 1;
    }

    pub fn record_invalid_block(&self) {
        self.lock().invalid_blocks += 1;
    }

    pub fn record_stored_block(&self) {
        self.lock().stored_blocks += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.lock();
        MetricsSnapshot {
            latest_block: c.latest_block,
            queue_length: c.queue_length,
            reorged_blocks: c.reorged_blocks,
            invalid_blocks: c.invalid_blocks,
            stored_blocks: c.stored_blocks,
            avg_processing_ms: c.processing.millis(),
            avg_scraping_ms: c.scraping.millis(),
            avg_indexing_ms: c.indexing.millis(),
        }
    }

    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }
}
