//! Block fixtures decoded from node-shaped JSON.

use blockscribe_core::transform::BlockRows;
use blockscribe_core::types::FullBlock;
use blockscribe_rpc::{RawBlock, RawReceipt};
use serde_json::json;

fn hash(seed: u64) -> String {
    format!("0x{seed:064x}")
}

fn header(number: u64, seed: u64, txs: usize) -> serde_json::Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": hash(seed),
        "parentHash": hash(seed.wrapping_sub(1)),
        "nonce": "0x0000000000000042",
        "sha3Uncles": hash(3),
        "logsBloom": "0x00",
        "transactionsRoot": hash(4),
        "stateRoot": hash(5),
        "receiptsRoot": hash(6),
        "miner": "0x829BD824B016326A401d083B33D092293333A830",
        "difficulty": "0x2540be400",
        "totalDifficulty": "0xc70d815d562d3cfa955",
        "extraData": "0x",
        "size": "0x21c",
        "gasLimit": "0x1c9c380",
        "gasUsed": format!("0x{:x}", 21_000 * txs as u64),
        "timestamp": "0x5f5e1000",
        "mixHash": hash(9),
    })
}

/// Rows for block `number` with hash `hash(seed)`, `txs` transfers with one
/// log each, and `uncles` uncles.
pub fn rows(number: u64, seed: u64, txs: usize, uncles: usize) -> BlockRows {
    let block_hash = hash(seed);
    let mut transactions = Vec::new();
    let mut receipts = Vec::new();
    for i in 0..txs {
        let tx_hash = hash(seed * 1_000 + i as u64 + 1);
        transactions.push(json!({
            "hash": tx_hash,
            "nonce": format!("0x{i:x}"),
            "blockHash": block_hash,
            "blockNumber": format!("0x{number:x}"),
            "transactionIndex": format!("0x{i:x}"),
            "from": "0x5a0b54d5dc17e0aadc383d2db43b0a0d3e029c4c",
            "to": "0xea674fdde714fd979de3edf0f56aa9716b898ec8",
            "value": "0xde0b6b3a7640000",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "input": "0x",
        }));
        receipts.push(json!({
            "transactionHash": tx_hash,
            "transactionIndex": format!("0x{i:x}"),
            "blockHash": block_hash,
            "blockNumber": format!("0x{number:x}"),
            "cumulativeGasUsed": format!("0x{:x}", 21_000 * (i as u64 + 1)),
            "gasUsed": "0x5208",
            "contractAddress": null,
            "logs": [{
                "address": "0xea674fdde714fd979de3edf0f56aa9716b898ec8",
                "topics": [hash(7), hash(8)],
                "data": "0x01",
                "logIndex": format!("0x{i:x}"),
                "transactionHash": tx_hash,
                "transactionIndex": format!("0x{i:x}"),
            }],
            "logsBloom": "0x00",
            "status": "0x1",
        }));
    }

    let uncle_blocks: Vec<RawBlock> = (0..uncles)
        .map(|i| {
            serde_json::from_value(header(number.saturating_sub(1), seed * 100 + i as u64 + 1, 0))
                .expect("uncle fixture")
        })
        .collect();

    let mut block = header(number, seed, txs);
    block["transactions"] = json!(transactions);
    block["uncles"] = json!(uncle_blocks.iter().map(|u| u.hash.clone()).collect::<Vec<_>>());

    let full = FullBlock {
        block: serde_json::from_value(block).expect("block fixture"),
        receipts: receipts
            .into_iter()
            .map(|r| serde_json::from_value::<RawReceipt>(r).expect("receipt fixture"))
            .collect(),
        uncles: uncle_blocks,
    };
    BlockRows::from_full_block(&full).expect("fixture transforms")
}
