//! blockscribe-storage: SQL backends for the block store and task queue.
//!
//! | Feature    | Backend                        |
//! |------------|--------------------------------|
//! | `sqlite`   | [`sqlite::SqliteStore`] (default) |
//! | `postgres` | [`postgres::PostgresStore`]    |
//!
//! Both persist the same five tables (`blocks`, `txs`, `uncles`,
//! `log_entries`, `account_txs`) plus the `todo_queue` table backing the
//! task queue.

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod test_fixtures;

use std::sync::Arc;

use blockscribe_core::error::IndexerError;
use blockscribe_core::queue::QueueStore;
use blockscribe_core::storage::BlockStore;

/// A block store and the queue store sharing its connection pool.
pub struct Backend {
    pub blocks: Arc<dyn BlockStore>,
    pub queue: Arc<dyn QueueStore>,
}

/// Open the backend named by `database_url`.
///
/// `postgres://` and `postgresql://` URLs select PostgreSQL; `sqlite:` URLs
/// and bare paths select SQLite.
pub async fn open(database_url: &str, automigrate: bool) -> Result<Backend, IndexerError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        return open_postgres(database_url, automigrate).await;
    }
    open_sqlite(database_url, automigrate).await
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str, automigrate: bool) -> Result<Backend, IndexerError> {
    let store = postgres::PostgresStore::connect(url, automigrate).await?;
    Ok(Backend {
        queue: Arc::new(store.queue_store()),
        blocks: Arc::new(store),
    })
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str, _automigrate: bool) -> Result<Backend, IndexerError> {
    Err(IndexerError::Storage(
        "postgres support not compiled in (enable the `postgres` feature)".into(),
    ))
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(url: &str, automigrate: bool) -> Result<Backend, IndexerError> {
    let store = if url == "sqlite::memory:" || url == ":memory:" {
        sqlite::SqliteStore::in_memory().await?
    } else {
        let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")).unwrap_or(url);
        sqlite::SqliteStore::open(path, automigrate).await?
    };
    Ok(Backend {
        queue: Arc::new(store.queue_store()),
        blocks: Arc::new(store),
    })
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_url: &str, _automigrate: bool) -> Result<Backend, IndexerError> {
    Err(IndexerError::Storage(
        "sqlite support not compiled in (enable the `sqlite` feature)".into(),
    ))
}
