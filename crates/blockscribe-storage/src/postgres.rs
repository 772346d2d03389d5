//! PostgreSQL storage backend.
//!
//! Block rows go into `blocks`, `txs`, `uncles`, `log_entries` and
//! `account_txs`; gas, value and difficulty columns are `NUMERIC(78)`. The
//! task queue lives in `todo_queue`.
//!
//! # Usage
//! ```rust,no_run
//! use blockscribe_storage::postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgresql://localhost/blockscribe", true).await?;
//! let queue = store.queue_store();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};

use blockscribe_core::error::IndexerError;
use blockscribe_core::queue::QueueStore;
use blockscribe_core::storage::{BlockStore, StoreOutcome};
use blockscribe_core::transform::BlockRows;

/// Rows per multi-row `INSERT`; keeps bind parameters under the protocol limit.
const INSERT_CHUNK: usize = 1_000;

/// How often a blocking pop re-checks an empty queue.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed block store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and, when `automigrate` is set, create the schema.
    pub async fn connect(database_url: &str, automigrate: bool) -> Result<Self, IndexerError> {
        Self::connect_with_options(database_url, PostgresOptions::default(), automigrate).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
        automigrate: bool,
    ) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        if automigrate {
            store.init_schema().await?;
        }
        info!(automigrate, "connected to postgres");
        Ok(store)
    }

    /// Queue store sharing this store's pool.
    pub fn queue_store(&self) -> PostgresQueueStore {
        PostgresQueueStore {
            pool: self.pool.clone(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and the `delete_block` function if missing.
    pub async fn init_schema(&self) -> Result<(), IndexerError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(format!("init schema: {e}")))?;
        }
        debug!("postgres schema ready");
        Ok(())
    }

    async fn insert_rows(
        tx: &mut Transaction<'_, Postgres>,
        rows: &BlockRows,
    ) -> Result<(), sqlx::Error> {
        let b = &rows.block;
        let includes_uncle = serde_json::to_string(&b.includes_uncle)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            r#"INSERT INTO blocks (
                number, block_hash, parent_block_hash, block_creation_time,
                block_gas_limit, block_gas_used, block_difficulty, total_block_difficulty,
                block_extra_data, block_mix_hash, block_nonce, block_size, block_logs_bloom,
                includes_uncle, has_beneficiary, has_receipts_trie, has_tx_trie, sha3_uncles,
                number_of_uncles, number_of_txs
            ) VALUES (
                $1, $2, $3, $4, $5::numeric, $6::numeric, $7::numeric, $8::numeric,
                $9, $10, $11, $12, $13, $14::json, $15, $16, $17, $18, $19, $20
            )"#,
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
        .bind(b.number_of_uncles as i32)
        .bind(b.number_of_txs as i32)
        .execute(&mut **tx)
        .await?;

        for chunk in rows.txs.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                r#"INSERT INTO txs (
                    tx_hash, included_in_block, tx_index, "from", "to", value, tx_nonce,
                    msg_gas_limit, tx_gas_used, tx_gas_price, cumulative_gas_used, msg_payload,
                    msg_status, creates, tx_logs_bloom, block_creation_time, log_entries_triggered
                ) "#,
            );
            qb.push_values(chunk, |mut q, t| {
                q.push_bind(&t.tx_hash)
                    .push_bind(t.included_in_block as i64)
                    .push_bind(t.tx_index as i32)
                    .push_bind(&t.from)
                    .push_bind(&t.to)
                    .push_bind(&t.value)
                    .push_unseparated("::numeric")
                    .push_bind(t.tx_nonce as i64)
                    .push_bind(&t.msg_gas_limit)
                    .push_unseparated("::numeric")
                    .push_bind(&t.tx_gas_used)
                    .push_unseparated("::numeric")
                    .push_bind(&t.tx_gas_price)
                    .push_unseparated("::numeric")
                    .push_bind(&t.cumulative_gas_used)
                    .push_unseparated("::numeric")
                    .push_bind(&t.msg_payload)
                    .push_bind(&t.msg_status)
                    .push_bind(&t.creates)
                    .push_bind(&t.tx_logs_bloom)
                    .push_bind(t.block_creation_time)
                    .push_bind(t.log_entries_triggered as i32);
            });
            qb.build().execute(&mut **tx).await?;
        }

        for chunk in rows.uncles.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
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
                    .push_bind(u.uncle_index as i32)
                    .push_bind(&u.block_gas_limit)
                    .push_unseparated("::numeric")
                    .push_bind(&u.block_gas_used)
                    .push_unseparated("::numeric")
                    .push_bind(&u.has_beneficiary)
                    .push_bind(&u.block_difficulty)
                    .push_unseparated("::numeric")
                    .push_bind(&u.block_extra_data)
                    .push_bind(&u.block_mix_hash)
                    .push_bind(&u.block_nonce)
                    .push_bind(&u.sha3_uncles);
            });
            qb.build().execute(&mut **tx).await?;
        }

        for chunk in rows.log_entries.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO log_entries (
                    tx_hash, log_index, log_data, logged_by,
                    topic_0, topic_1, topic_2, topic_3, included_in_block
                ) ",
            );
            qb.push_values(chunk, |mut q, l| {
                q.push_bind(&l.tx_hash)
                    .push_bind(l.log_index as i32)
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
            let mut qb = QueryBuilder::<Postgres>::new(
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
impl BlockStore for PostgresStore {
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

        let existing = sqlx::query("SELECT 1 FROM blocks WHERE block_hash = $1 LIMIT 1")
            .bind(rows.hash())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if existing.is_some() {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(StoreOutcome::AlreadyStored);
        }

        let conflicting = sqlx::query("SELECT block_hash FROM blocks WHERE number = $1 LIMIT 1")
            .bind(number)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        let outcome = match conflicting {
            Some(row) => {
                let old: String = row.try_get("block_hash").map_err(storage_err)?;
                info!(block = rows.number(), old = %old, new = %rows.hash(), "reorg detected, deleting stored block");
                sqlx::query("SELECT delete_block($1)")
                    .bind(number)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
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
        sqlx::query("TRUNCATE TABLE blocks, uncles, txs, log_entries, account_txs RESTART IDENTITY")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        Ok(())
    }
}

// ─── PostgresQueueStore ──────────────────────────────────────────────────────

/// Task queue kept in the `todo_queue` table.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_pop(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query(
            "DELETE FROM todo_queue
             WHERE number = (
                SELECT number FROM todo_queue ORDER BY number DESC LIMIT 1 FOR UPDATE SKIP LOCKED
             )
             RETURNING number",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Queue(e.to_string()))?;
        Ok(row.map(|r| r.get::<i64, _>("number") as u64))
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn upsert(&self, number: u64) -> Result<(), IndexerError> {
        sqlx::query("INSERT INTO todo_queue (number) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(number as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Queue(e.to_string()))?;
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
            .map_err(|e| IndexerError::Queue(e.to_string()))?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM todo_queue")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Queue(e.to_string()))?;
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
        number                   BIGINT      NOT NULL,
        block_hash               TEXT        NOT NULL,
        parent_block_hash        TEXT        NOT NULL,
        block_creation_time      TIMESTAMPTZ,
        block_gas_limit          NUMERIC(78) NOT NULL,
        block_gas_used           NUMERIC(78) NOT NULL,
        block_difficulty         NUMERIC(78) NOT NULL,
        total_block_difficulty   NUMERIC(78) NOT NULL,
        block_extra_data         BYTEA,
        block_mix_hash           BYTEA       NOT NULL,
        block_nonce              BYTEA       NOT NULL,
        block_size               BIGINT      NOT NULL,
        block_logs_bloom         BYTEA       NOT NULL,
        includes_uncle           JSON,
        has_beneficiary          BYTEA,
        has_receipts_trie        BYTEA,
        has_tx_trie              BYTEA,
        sha3_uncles              BYTEA,
        number_of_uncles         INTEGER     DEFAULT 0,
        number_of_txs            INTEGER     DEFAULT 0,
        created_at               TIMESTAMP   DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS blocks_block_hash_idx ON blocks (block_hash)",
    "CREATE INDEX IF NOT EXISTS blocks_number_idx ON blocks (number)",
    "CREATE TABLE IF NOT EXISTS uncles (
        block_hash               TEXT        NOT NULL,
        included_in_block        BIGINT      NOT NULL,
        number                   BIGINT      NOT NULL,
        block_creation_time      TIMESTAMPTZ NOT NULL,
        uncle_index              INTEGER     NOT NULL,
        block_gas_limit          NUMERIC(78) NOT NULL,
        block_gas_used           NUMERIC(78) NOT NULL,
        has_beneficiary          BYTEA       NOT NULL,
        block_difficulty         NUMERIC(78) NOT NULL,
        block_extra_data         BYTEA       NOT NULL,
        block_mix_hash           BYTEA       NOT NULL,
        block_nonce              BYTEA       NOT NULL,
        sha3_uncles              BYTEA       NOT NULL,
        created_at               TIMESTAMP   DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS uncles_block_hash_idx ON uncles (block_hash)",
    "CREATE INDEX IF NOT EXISTS uncles_included_in_block_idx ON uncles (included_in_block)",
    r#"CREATE TABLE IF NOT EXISTS txs (
        tx_hash                  TEXT        NOT NULL,
        included_in_block        BIGINT      NOT NULL,
        tx_index                 INTEGER     NOT NULL,
        "from"                   BYTEA       NOT NULL,
        "to"                     BYTEA       NOT NULL,
        value                    NUMERIC(78) NOT NULL,
        tx_nonce                 BIGINT      NOT NULL,
        msg_gas_limit            NUMERIC(78) NOT NULL,
        tx_gas_used              NUMERIC(78),
        tx_gas_price             NUMERIC(78) NOT NULL,
        cumulative_gas_used      NUMERIC(78) NOT NULL,
        msg_payload              BYTEA,
        msg_status               TEXT,
        creates                  BYTEA,
        tx_logs_bloom            BYTEA,
        block_creation_time      TIMESTAMPTZ,
        log_entries_triggered    INTEGER     DEFAULT 0,
        created_at               TIMESTAMP   DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS txs_tx_hash_idx ON txs (tx_hash)",
    "CREATE INDEX IF NOT EXISTS txs_block_idx ON txs (included_in_block DESC, tx_index DESC)",
    "CREATE TABLE IF NOT EXISTS log_entries (
        tx_hash                  TEXT        NOT NULL,
        log_index                INTEGER     NOT NULL,
        log_data                 BYTEA,
        logged_by                TEXT        NOT NULL,
        topic_0                  TEXT,
        topic_1                  TEXT,
        topic_2                  TEXT,
        topic_3                  TEXT,
        included_in_block        BIGINT      NOT NULL,
        created_at               TIMESTAMP   DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS log_entries_tx_idx ON log_entries (tx_hash, log_index)",
    "CREATE INDEX IF NOT EXISTS log_entries_block_idx ON log_entries (included_in_block)",
    "CREATE TABLE IF NOT EXISTS account_txs (
        address                  TEXT        NOT NULL,
        counterparty             TEXT        NOT NULL,
        tx_hash                  TEXT        NOT NULL,
        out                      BOOLEAN,
        included_in_block        BIGINT      NOT NULL,
        tx_index                 BIGINT      NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS account_txs_address_idx
        ON account_txs (address, included_in_block DESC, tx_index DESC)",
    "CREATE INDEX IF NOT EXISTS account_txs_block_idx ON account_txs (included_in_block DESC)",
    "CREATE TABLE IF NOT EXISTS todo_queue (
        number                   BIGINT      PRIMARY KEY
    )",
    "CREATE OR REPLACE FUNCTION delete_block(block_number BIGINT) RETURNS VOID AS $$
    BEGIN
        DELETE FROM account_txs WHERE included_in_block = block_number;
        DELETE FROM log_entries WHERE included_in_block = block_number;
        DELETE FROM txs         WHERE included_in_block = block_number;
        DELETE FROM uncles      WHERE included_in_block = block_number;
        DELETE FROM blocks      WHERE number = block_number;
    END;
    $$ LANGUAGE plpgsql",
];

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::rows;

    // Set DATABASE_URL environment variable to enable.
    // Example: DATABASE_URL=postgresql://localhost/blockscribe_test cargo test --features postgres

    async fn connect() -> PostgresStore {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = PostgresStore::connect(&url, true).await.unwrap();
        store.reset().await.unwrap();
        store.queue_store().clear().await.unwrap();
        store
    }

    async fn count(store: &PostgresStore, table: &str, number: i64) -> i64 {
        let column = if table == "blocks" { "number" } else { "included_in_block" };
        let sql = format!("SELECT COUNT(*) AS cnt FROM {table} WHERE {column} = $1");
        sqlx::query(&sql)
            .bind(number)
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("cnt")
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn store_and_replace_block() {
        let store = connect().await;

        assert_eq!(store.store(&rows(100, 1, 3, 1)).await.unwrap(), StoreOutcome::Inserted);
        assert_eq!(store.store(&rows(100, 1, 3, 1)).await.unwrap(), StoreOutcome::AlreadyStored);
        assert_eq!(count(&store, "account_txs", 100).await, 6);

        assert_eq!(store.store(&rows(100, 2, 1, 0)).await.unwrap(), StoreOutcome::Replaced);
        assert_eq!(count(&store, "blocks", 100).await, 1);
        assert_eq!(count(&store, "txs", 100).await, 1);
        assert_eq!(count(&store, "uncles", 100).await, 0);
        assert_eq!(count(&store, "log_entries", 100).await, 1);
        assert_eq!(count(&store, "account_txs", 100).await, 2);
        assert_eq!(store.highest_block().await.unwrap(), Some(100));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn numeric_columns_keep_full_precision() {
        let store = connect().await;
        let mut block = rows(7, 7, 1, 0);
        block.txs[0].value = "115792089237316195423570985008687907853269984665640564039457584007913129639935".into();
        store.store(&block).await.unwrap();

        let value: String = sqlx::query("SELECT value::text AS v FROM txs WHERE included_in_block = 7")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("v");
        assert_eq!(value, block.txs[0].value);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn queue_pops_highest() {
        let store = connect().await;
        let queue = store.queue_store();
        for n in [100, 105, 102, 105] {
            queue.upsert(n).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 3);
        let wait = Duration::from_millis(10);
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(105));
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(102));
        assert_eq!(queue.pop_max(wait).await.unwrap(), Some(100));
        assert_eq!(queue.pop_max(wait).await.unwrap(), None);
    }
}
