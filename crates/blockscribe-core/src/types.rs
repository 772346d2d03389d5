//! Shared pipeline types.

use blockscribe_rpc::{RawBlock, RawReceipt};
use serde::{Deserialize, Serialize};

/// A block with everything needed to store it.
///
/// `receipts[i]` belongs to `block.transactions[i]`. `uncles` is empty when
/// uncle scraping is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullBlock {
    pub block: RawBlock,
    pub receipts: Vec<RawReceipt>,
    pub uncles: Vec<RawBlock>,
}

/// Which transport produced a head value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadSource {
    /// `newHeads` subscription.
    Push,
    /// `eth_blockNumber` polling or a direct query.
    Poll,
}

/// The highest block number currently believed canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub number: u64,
    pub source: HeadSource,
}
