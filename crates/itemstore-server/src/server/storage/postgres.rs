use super::{Change, ChangeSet, ItemRepository, StorageError, UnitOfWork, modified_at};
use chrono::{DateTime, Utc};
use itemstore_core::types::{Item, NewItem, Page, PageRequest};
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

const COLUMNS: &str = "id, name, created_at, updated_at, version";

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

/// PostgreSQL-backed repository. Each commit runs in its own transaction.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

#[tonic::async_trait]
impl ItemRepository for PostgresRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(PostgresUnitOfWork {
            pool: self.pool.clone(),
            changes: ChangeSet::default(),
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

struct PostgresUnitOfWork {
    pool: PgPool,
    changes: ChangeSet,
}

#[tonic::async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn save(&mut self, item: NewItem) -> Uuid {
        self.changes.insert(item)
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {COLUMNS} FROM items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Item::from))
    }

    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError> {
        // The window and the count must come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {COLUMNS} FROM items ORDER BY created_at, id OFFSET $1 LIMIT $2"
        ))
        .bind(request.offset() as i64)
        .bind(i64::from(request.page_size()))
        .fetch_all(&mut *tx)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Page::new(
            rows.into_iter().map(Item::from).collect(),
            total.max(0) as u64,
        ))
    }

    fn update(&mut self, item: Item) {
        self.changes.update(item);
    }

    fn delete(&mut self, item: Item) {
        self.changes.delete(item);
    }

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        let changes = self.changes.take();
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(changes.len());

        // Dropping `tx` on an early return rolls the transaction back.
        for change in changes {
            match change {
                Change::Insert { id, name } => {
                    let row = sqlx::query_as::<_, ItemRow>(&format!(
                        "INSERT INTO items (id, name, created_at, updated_at, version) \
                         VALUES ($1, $2, $3, NULL, 1) RETURNING {COLUMNS}"
                    ))
                    .bind(id)
                    .bind(&name)
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?;
                    written.push(row.into());
                }
                Change::Update(item) => {
                    let row = sqlx::query_as::<_, ItemRow>(&format!(
                        "UPDATE items SET name = $2, updated_at = $3, version = version + 1 \
                         WHERE id = $1 AND version = $4 RETURNING {COLUMNS}"
                    ))
                    .bind(item.id)
                    .bind(&item.name)
                    .bind(modified_at(now, item.created_at))
                    .bind(item.version)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(StorageError::Conflict { id: item.id })?;
                    written.push(row.into());
                }
                Change::Delete(item) => {
                    let result = sqlx::query("DELETE FROM items WHERE id = $1 AND version = $2")
                        .bind(item.id)
                        .bind(item.version)
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::Conflict { id: item.id });
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(written)
    }
}
