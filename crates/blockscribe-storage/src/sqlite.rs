//! SQLite storage backend.
//!
//! Same tables as the Postgres backend. Arbitrary-precision quantities are
//! stored as decimal TEXT, byte fields as BLOB.
//!
//! # Usage
//! ```rust,no_run
//! use blockscribe_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::open("./blockscribe.db", true).await?;
//! let queue = store.queue_store();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use blockscribe_core::error::IndexerError;
use blockscribe_core::queue::QueueStore;
use blockscribe_core::storage::{BlockStore, StoreOutcome};
use blockscribe_core::transform::BlockRows;

/// Rows per multi-row `INSERT`; SQLite caps bind parameters per statement.
const INSERT_CHUNK: usize = 500;

const POP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Child tables first, `blocks` last.
const CHILD_TABLES: [&str; 4] = ["account_txs", "log_entries", "txs", "uncles"];

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn queue_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Queue(e.to_string())
}

// ─── SqliteStore ─────────────────────────────────────────────────────────────

/// SQLite-backed block store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database file.
    pub async fn open(path: &str, automigrate: bool) -> Result<Self, IndexerError> {
        let url = format!("sqlite:{path}?mode=rwc");
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(format!("sqlite open {path}: {e}")))?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        if automigrate {
            store.init_schema().await?;
        }
        info!(path, automigrate, "opened sqlite database");
        Ok(store)
    }

    /// Private in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // One connection that never expires; each new connection would see an empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Queue store sharing this store's pool.
    pub fn queue_store(&self) -> SqliteQueueStore {
        SqliteQueueStore::new(self.pool.clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), IndexerError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(format!("init schema: {e}")))?;
        }
        Ok(())
    }

    async fn delete_block(tx: &mut Transaction<'_, Sqlite>, number: i64) -> Result<(), sqlx::Error> {
        for table in CHILD_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE included_in_block = ?"))
                .bind(number)
                .execute(&mut **tx)
                .await?;
        }
        sqlx::query("DELETE FROM blocks WHERE number = ?")
            .bind(number)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_rows(tx: &mut Transaction<'_, Sqlite>, rows: &BlockRows) -> Result<(), sqlx::Error> {
        let b = &rows.block;
        let includes_uncle = serde_json::to_string(&b.includes_uncle)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO blocks (
                number, block_hash, parent_block_hash, block_creation_time,
                block_gas_limit, block_gas_used, block_difficulty, total_block_difficulty,
                block_extra_data, block_mix_hash, block_nonce, block_size, block_logs_bloom,
                includes_uncle, has_beneficiary, has_receipts_trie, has_tx_trie, sha3_uncles,
                number_of_uncles, number_of_txs
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(b.number as i64)
        .bind(&b.block_hash)
        .bind(&b.parent_block_hash)
        .bind(b.block_creation_time)
        .bind(&b.block_gas_limit)
        .bind(&b.block_gas_used)
        .bind(&b.block_difficulty)
        .bind(&b.total_block_difficulty)
        .bind(&b.block_extra_data)
        .bind(&b.block_mix_hash)
        .bind(&b.block_nonce)
        .bind(b.block_size as i64)
        .bind(&b.block_logs_bloom)
        .bind(includes_uncle)
        .bind(&b.has_beneficiary)
        .bind(&b.has_receipts_trie)
        .bind(&b.has_tx_trie)
        .bind(&b.sha3_uncles)
        .bind(b.number_of_uncles as i64)
        .bind(b.number_of_txs as i64)
        .execute(&mut **tx)
        .await?;

        for chunk in rows.txs.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                r#"INSERT INTO txs (
                    tx_hash, included_in_block, tx_index, "from", "to", value, tx_nonce,
                    msg_gas_limit, tx_gas_used, tx_gas_price, cumulative_gas_used, msg_payload,
                    msg_status, creates, tx_logs_bloom, block_creation_time, log_entries_triggered
                ) "#,
            );
            qb.push_values(chunk, |mut q, t| {
                q.push_bind(&t.tx_hash)
                    .push_bind(t.included_in_block as i64)
                    .push_bind(t.tx_index as i64)
                    .push_bind(&t.from)
                    .push_bind(&t.to)
                    .push_bind(&t.value)
                    .push_bind(t.tx_nonce as i64)
                    .push_bind(&t.msg_gas_limit)
                    .push_bind(&t.tx_gas_used)
                    .push_bind(&t.tx_gas_price)
                    .push_bind(&t.cumulative_gas_used)
                    .push_bind(&t.msg_payload)
                    .push_bind(&t.msg_status)
                    .push_bind(&t.creates)
                    .push_bind(&t.tx_logs_bloom)
                    .push_bind(t.block_creation_time)
                    .push_bind(t.log_entries_triggered as i64);
            });
            qb.build().execute(&mut **tx).await?;
        }

        for chunk in rows.uncles.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO uncles (
                    block_hash, included_in_block, number, block_creation_time, uncle_index,
                    block_gas_limit, block_gas_used, has_beneficiary, block_difficulty,
                    block_extra_data, block_mix_hash, block_nonce, sha3_uncles
                ) ",
            );
            qb.push_values(chunk, |mut q, u| {
                q.push_bind(&u.block_hash)
                    .push_bind(u.included_in_block as i64)
                    .push_bind(u.number as i64)
                    .push_bind(u.block_creation_time)
                    .push_bind(u.uncle_index as i64)
                    .push_bind(&u.block_gas_limit)
                    .push_bind(&u.block_gas_used)
                    .push_bind(&u.has_beneficiary)
                    .push_bind(&u.block_difficulty)
                    .push_bind(&u.block_extra_data)
                    .push_bind(&u.block_mix_hash)
                    .push_bind(&u.block_nonce)
                    .push_bind(&u.sha3_uncles);
            });
            qb.build().execute(&mut **tx).await?;
        }

        for chunk in rows.log_entries.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO log_entries (
                    tx_hash, log_index, log_data, logged_by,
                    topic_0, topic_1, topic_2, topic_3, included_in_block
                ) ",
            );
            qb.push_values(chunk, |mut q, l| {
                q.push_bind(&l.tx_hash)
                    .push_bind(l.log_index as i64)
                    .push_bind(&l.log_data)
                    .push_bind(&l.logged_by)
                    .push_bind(&l.topic_0)
                    .push_bind(&l.topic_1)
                    .push_bind(&l.topic_2)
                    .push_bind(&l.topic_3)
                    .push_bind(l.included_in_block as i64);
            });
            qb.build().execute(&mut **tx).await?;
        }

        for chunk in rows.account_txs.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO account_txs (
                    address, counterparty, tx_hash, out, included_in_block, tx_index
                ) ",
            );
            qb.push_values(chunk, |mut q, a| {
                q.push_bind(&a.address)
                    .push_bind(&a.counterparty)
                    .push_bind(&a.tx_hash)
                    .push_bind(a.out)
                    .push_bind(a.included_in_block as i64)
                    .push_bind(a.tx_index as i64);
            });
            qb.build().execute(&mut **tx).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl BlockStore for SqliteStore {
    async fn highest_block(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(number) AS max FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let max: Option<i64> = row.try_get("max").map_err(storage_err)?;
        Ok(max.map(|n| n as u64))
    }

    async fn store(&self, rows: &BlockRows) -> Result<StoreOutcome, IndexerError> {
        let number = rows.number() as i64;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing = sqlx::query("SELECT 1 FROM blocks WHERE block_hash = ? LIMIT 1")
            .bind(rows.hash())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if existing.is_some() {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(StoreOutcome::AlreadyStored);
        }

        let conflicting = sqlx::query("SELECT block_hash FROM blocks WHERE number = ? LIMIT 1")
            .bind(number)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        let outcome = match conflicting {
            Some(row) => {
                let old: String = row.try_get("block_hash").map_err(storage_err)?;
                info!(block = rows.number(), old = %old, new = %rows.hash(), "reorg detected, deleting stored block");
                Self::delete_block(&mut tx, number).await.map_err(storage_err)?;
                StoreOutcome::Replaced
            }
            None => StoreOutcome::Inserted,
        };

        Self::insert_rows(&mut tx, rows).await.map_err(storage_err)?;
        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit block {}: {e}", rows.number())))?;

        debug!(block = rows.number(), ?outcome, txs = rows.txs.len(), "block stored");
        Ok(outcome)
    }

    async fn reset(&self) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in CHILD_TABLES.iter().chain(&["blocks"]) {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        Ok(())
    }
}

// ─── SqliteQueueStore ────────────────────────────────────────────────────────

/// Task queue kept in the `todo_queue` table.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn try_pop(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query(
            "DELETE FROM todo_queue
             WHERE number = (SELECT MAX(number) FROM todo_queue)
             RETURNING number",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_err)?;
        Ok(row.map(|r| r.get::<i64, _>("number") as u64))
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn upsert(&self, number: u64) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR IGNORE INTO todo_queue (number) VALUES (?)")
            .bind(number as i64)
            .execute(&self.pool)
            .await
            .map_err(queue_err)?;
        Ok(())
    }

    async fn pop_max(&self, wait: Duration) -> Result<Option<u64>, IndexerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(n) = self.try_pop().await? {
                return Ok(Some(n));
            }
            if tokio::time::Instant::now() + POP_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL).await;
        }
    }

    async fn len(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM todo_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(queue_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM todo_queue")
            .execute(&self.pool)
            .await
            .map_err(queue_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        Ok(())
    }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        number                   INTEGER NOT NULL,
        block_hash               TEXT    NOT NULL,
        parent_block_hash        TEXT    NOT NULL,
        block_creation_time      TEXT,
        block_gas_limit          TEXT    NOT NULL,
        block_gas_used           TEXT    NOT NULL,
        block_difficulty         TEXT    NOT NULL,
        total_block_difficulty   TEXT    NOT NULL,
        block_extra_data         BLOB,
        block_mix_hash           BLOB    NOT NULL,
        block_nonce              BLOB    NOT NULL,
        block_size               INTEGER NOT NULL,
        block_logs_bloom         BLOB    NOT NULL,
        includes_uncle           TEXT,
        has_beneficiary          BLOB,
        has_receipts_trie        BLOB,
        has_tx_trie              BLOB,
        sha3_uncles              BLOB,
        number_of_uncles         INTEGER DEFAULT 0,
        number_of_txs            INTEGER DEFAULT 0,
        created_at               TEXT    DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS blocks_block_hash_idx ON blocks (block_hash)",
    "CREATE INDEX IF NOT EXISTS blocks_number_idx ON blocks (number)",
    "CREATE TABLE IF NOT EXISTS uncles (
        block_hash               TEXT    NOT NULL,
        included_in_block        INTEGER NOT NULL,
        number                   INTEGER NOT NULL,
        block_creation_time      TEXT    NOT NULL,
        uncle_index              INTEGER NOT NULL,
        block_gas_limit          TEXT    NOT NULL,
        block_gas_used           TEXT    NOT NULL,
        has_beneficiary          BLOB    NOT NULL,
        block_difficulty         TEXT    NOT NULL,
        block_extra_data         BLOB    NOT NULL,
        block_mix_hash           BLOB    NOT NULL,
        block_nonce              BLOB    NOT NULL,
        sha3_uncles              BLOB    NOT NULL,
        created_at               TEXT    DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS uncles_block_hash_idx ON uncles (block_hash)",
    "CREATE INDEX IF NOT EXISTS uncles_included_in_block_idx ON uncles (included_in_block)",
    r#"CREATE TABLE IF NOT EXISTS txs (
        tx_hash                  TEXT    NOT NULL,
        included_in_block        INTEGER NOT NULL,
        tx_index                 INTEGER NOT NULL,
        "from"                   BLOB    NOT NULL,
        "to"                     BLOB    NOT NULL,
        value                    TEXT    NOT NULL,
        tx_nonce                 INTEGER NOT NULL,
        msg_gas_limit            TEXT    NOT NULL,
        tx_gas_used              TEXT,
        tx_gas_price             TEXT    NOT NULL,
        cumulative_gas_used      TEXT    NOT NULL,
        msg_payload              BLOB,
        msg_status               TEXT,
        creates                  BLOB,
        tx_logs_bloom            BLOB,
        block_creation_time      TEXT,
        log_entries_triggered    INTEGER DEFAULT 0,
        created_at               TEXT    DEFAULT CURRENT_TIMESTAMP
    )"#,
    "CREATE INDEX IF NOT EXISTS txs_tx_hash_idx ON txs (tx_hash)",
    "CREATE INDEX IF NOT EXISTS txs_block_idx ON txs (included_in_block DESC, tx_index DESC)",
    "CREATE TABLE IF NOT EXISTS log_entries (
        tx_hash                  TEXT    NOT NULL,
        log_index                INTEGER NOT NULL,
        log_data                 BLOB,
        logged_by                TEXT    NOT NULL,
        topic_0                  TEXT,
        topic_1                  TEXT,
        topic_2                  TEXT,
        topic_3                  TEXT,
        included_in_block        INTEGER NOT NULL,
        created_at               TEXT    DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS log_entries_tx_idx ON log_entries (tx_hash, log_index)",
    "CREATE INDEX IF NOT EXISTS log_entries_block_idx ON log_entries (included_in_block)",
    "CREATE TABLE IF NOT EXISTS account_txs (
        address                  TEXT    NOT NULL,
        counterparty             TEXT    NOT NULL,
        tx_hash                  TEXT    NOT NULL,
        out                      INTEGER,
        included_in_block        INTEGER NOT NULL,
        tx_index                 INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS account_txs_address_idx
        ON account_txs (address, included_in_block DESC, tx_index DESC)",
    "CREATE INDEX IF NOT EXISTS account_txs_block_idx ON account_txs (included_in_block DESC)",
    "CREATE TABLE IF NOT EXISTS todo_queue (
        number                   INTEGER PRIMARY KEY
    )",
];

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::rows;

    async fn count(store: &SqliteStore, table: &str, number: i64) -> i64 {
        let column = if table == "blocks" { "number" } else { "included_in_block" };
        let sql = format!("SELECT COUNT(*) AS cnt FROM {table} WHERE {column} = ?");
        sqlx::query(&sql)
            .bind(number)
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("cnt")
    }

    #[tokio::test]
    async fn store_inserts_every_table() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = rows(100, 1, 3, 2);

        assert_eq!(store.store(&block).await.unwrap(), StoreOutcome::Inserted);
        assert_eq!(count(&store, "blocks", 100).await, 1);
        assert_eq!(count(&store, "txs", 100).await, 3);
        assert_eq!(count(&store, "uncles", 100).await, 2);
        assert_eq!(count(&store, "log_entries", 100).await, 3);
        assert_eq!(count(&store, "account_txs", 100).await, 6);
        assert_eq!(store.highest_block().await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn same_hash_is_already_stored() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = rows(100, 1, 2, 0);
        store.store(&block).await.unwrap();

        assert_eq!(store.store(&block).await.unwrap(), StoreOutcome::AlreadyStored);
        assert_eq!(count(&store, "blocks", 100).await, 1);
        assert_eq!(count(&store, "txs", 100).await, 2);
    }

    #[tokio::test]
    async fn different_hash_replaces_all_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.store(&rows(99, 9, 1, 0)).await.unwrap();
        store.store(&rows(100, 1, 3, 2)).await.unwrap();

        let fork = rows(100, 2, 1, 0);
        assert_eq!(store.store(&fork).await.unwrap(), StoreOutcome::Replaced);

        assert_eq!(count(&store, "blocks", 100).await, 1);
        assert_eq!(count(&store, "txs", 100).await, 1);
        assert_eq!(count(&store, "uncles", 100).await, 0);
        assert_eq!(count(&store, "log_entries", 100).await, 1);
        assert_eq!(count(&store, "account_txs", 100).await, 2);

        let hash: String = sqlx::query("SELECT block_hash FROM blocks WHERE number = 100")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("block_hash");
        assert_eq!(hash, fork.hash());

        // Neighbouring blocks are untouched.
        assert_eq!(count(&store, "txs", 99).await, 1);
    }

    #[tokio::test]
    async fn stored_columns_are_canonical() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = rows(100, 1, 1, 1);
        store.store(&block).await.unwrap();

        let row = sqlx::query(
            "SELECT block_hash, block_difficulty, includes_uncle, has_beneficiary FROM blocks",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        let hash: String = row.get("block_hash");
        assert!(!hash.starts_with("0x"));
        assert_eq!(row.get::<String, _>("block_difficulty"), "10000000000");
        let uncles: Vec<String> = serde_json::from_str(&row.get::<String, _>("includes_uncle")).unwrap();
        assert_eq!(uncles, block.block.includes_uncle);
        assert!(!uncles[0].starts_with("0x"));
        assert_eq!(row.get::<Vec<u8>, _>("has_beneficiary").len(), 20);

        let topic: String = sqlx::query("SELECT topic_0 FROM log_entries")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("topic_0");
        assert_eq!(topic, block.log_entries[0].topic_0.clone().unwrap());
    }

    #[tokio::test]
    async fn reset_empties_tables() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.store(&rows(100, 1, 2, 1)).await.unwrap();
        store.store(&rows(101, 2, 2, 0)).await.unwrap();

        store.reset().await.unwrap();
        assert_eq!(store.highest_block().await.unwrap(), None);
        assert_eq!(count(&store, "txs", 100).await, 0);
        assert_eq!(count(&store, "account_txs", 101).await, 0);
    }

    #[tokio::test]
    async fn queue_pops_highest_and_dedupes() {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = store.queue_store();
        for n in [100, 105, 102, 105, 100] {
            queue.upsert(n).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 3);

        let wait = Duration::from_millis(10);
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(105));
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(102));
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(100));
        assert_eq!(queue.pop_max(wait).await.unwrap(), None);
    }

    #[tokio::test]
    async fn queue_pop_waits_for_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = store.queue_store();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.upsert(7).await.unwrap();
        });
        assert_eq!(queue.pop_max(Duration::from_secs(5)).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn queue_clear() {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = store.queue_store();
        queue.upsert(1).await.unwrap();
        queue.upsert(2).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("blockscribe-{}.db", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        {
            let store = SqliteStore::open(&path, true).await.unwrap();
            store.store(&rows(42, 1, 1, 0)).await.unwrap();
            store.queue_store().upsert(43).await.unwrap();
            store.close().await.unwrap();
        }
        let store = SqliteStore::open(&path, true).await.unwrap();
        assert_eq!(store.highest_block().await.unwrap(), Some(42));
        assert_eq!(store.queue_store().len().await.unwrap(), 1);
        store.close().await.unwrap();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }

    #[tokio::test]
    async fn open_selects_backend_by_url() {
        let backend = crate::open("sqlite::memory:", true).await.unwrap();
        backend.queue.upsert(5).await.unwrap();
        assert_eq!(backend.queue.len().await.unwrap(), 1);
        assert_eq!(backend.blocks.highest_block().await.unwrap(), None);
    }
}
