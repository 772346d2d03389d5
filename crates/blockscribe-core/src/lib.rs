//! blockscribe-core: reorg-aware block ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! Indexer
//!   ├── HeadTracker   (newHeads push or eth_blockNumber polling, fan-out)
//!   ├── TaskQueue     (priority set of block numbers, pause/resume, backfill)
//!   ├── BlockFetcher  (block + concurrent receipts + uncles)
//!   ├── BlockValidator
//!   └── BlockStore    (memory here; PostgreSQL / SQLite in blockscribe-storage)
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod head;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod storage;
pub mod transform;
pub mod types;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainSource, HeadConnector, HeadStream, RpcHeadConnector};
pub use config::{Features, HeadTrackerConfig, IndexerBuilder, IndexerConfig, IndexerState, QueueConfig};
pub use error::{IndexerError, ValidationError};
pub use fetcher::BlockFetcher;
pub use head::HeadTracker;
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::Indexer;
pub use queue::{BackfillCursor, MemoryQueueStore, QueueStore, TaskQueue};
pub use storage::{BlockStore, MemoryBlockStore, StoreOutcome};
pub use transform::{AccountTxRow, BlockRow, BlockRows, LogEntryRow, TxRow, UncleRow};
pub use types::{FullBlock, Head, HeadSource};
pub use validator::{BlockValidator, StructuralValidator};
