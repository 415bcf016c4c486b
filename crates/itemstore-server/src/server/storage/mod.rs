//! Repository contract and storage backends.
//!
//! Every call obtains a fresh [`UnitOfWork`] from the shared
//! [`ItemRepository`]. Reads go straight to storage; writes are staged in
//! the unit of work and applied atomically by [`UnitOfWork::commit`].
//! Nothing staged is visible to other units of work until commit succeeds,
//! and a failed commit applies nothing.
//!
//! Concurrent writers are detected optimistically: every [`Item`] carries
//! the `version` it was read at, and a commit that finds a different version
//! in storage fails with [`StorageError::Conflict`].
//!
//! ## Backends
//!
//! - [`postgres::PostgresRepository`] - sqlx connection pool, one
//!   transaction per commit.
//! - [`memory::MemoryRepository`] - process-local map used in ephemeral mode
//!   and tests.

pub mod memory;
pub mod postgres;

use crate::server::config::{ServerConfig, StorageConfig};
use chrono::{DateTime, Utc};
use itemstore_core::types::{Item, NewItem, Page, PageRequest};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The row changed or disappeared since it was read.
    #[error("item {id} was modified concurrently")]
    Conflict { id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Shared handle to a storage backend.
#[tonic::async_trait]
pub trait ItemRepository: Send + Sync + 'static {
    /// Starts a request-scoped unit of work.
    fn unit_of_work(&self) -> Box<dyn UnitOfWork>;

    /// Total number of stored items.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Releases connections. Called once during shutdown.
    async fn close(&self);
}

/// Request-scoped batch of reads and staged writes.
#[tonic::async_trait]
pub trait UnitOfWork: Send {
    /// Stages an insert and returns the id assigned to the new item.
    fn save(&mut self, item: NewItem) -> Uuid;

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError>;

    /// Items ordered by creation time (then id), skipping
    /// `(start_page - 1) * page_size` and taking `page_size`, together with
    /// the total item count.
    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError>;

    /// Stages a modification of `item`, previously read through
    /// [`find_by_id`](Self::find_by_id) or [`find_page`](Self::find_page).
    fn update(&mut self, item: Item);

    /// Stages removal of `item`.
    fn delete(&mut self, item: Item);

    /// Applies every staged change atomically and returns the stored state of
    /// each inserted or updated item. Inserts receive `created_at`, updates
    /// receive `updated_at`, both set to the commit time.
    async fn commit(&mut self) -> Result<Vec<Item>, StorageError>;
}

/// A staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert { id: Uuid, name: String },
    Update(Item),
    Delete(Item),
}

/// Ordered list of staged writes shared by the backends.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn insert(&mut self, item: NewItem) -> Uuid {
        let id = Uuid::new_v4();
        self.changes.push(Change::Insert {
            id,
            name: item.name,
        });
        id
    }

    pub fn update(&mut self, item: Item) {
        self.changes.push(Change::Update(item));
    }

    pub fn delete(&mut self, item: Item) {
        self.changes.push(Change::Delete(item));
    }

    /// Takes the staged changes, leaving the set empty.
    pub fn take(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }
}

/// Modification time for an item created at `created_at`, never earlier than
/// its creation even if the wall clock stepped backwards.
pub fn modified_at(now: DateTime<Utc>, created_at: DateTime<Utc>) -> DateTime<Utc> {
    now.max(created_at)
}

/// Opens the backend selected by `config`, applying migrations for
/// PostgreSQL.
pub async fn connect(config: &ServerConfig) -> anyhow::Result<Arc<dyn ItemRepository>> {
    match &config.storage {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; data will not survive a restart");
            Ok(Arc::new(MemoryRepository::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout,
        } => {
            let repository =
                PostgresRepository::connect(url, *max_connections, *connect_timeout).await?;
            repository.migrate().await?;
            Ok(Arc::new(repository))
        }
    }
}

/// Closes `repository`, abandoning connections still checked out after
/// `grace`. Returns `false` when the deadline was hit.
pub async fn close_within(repository: &dyn ItemRepository, grace: Duration) -> bool {
    match tokio::time::timeout(grace, repository.close()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Storage did not release its connections in time"
            );
            false
        }
    }
}
