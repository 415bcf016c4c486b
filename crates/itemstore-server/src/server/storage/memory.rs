use super::{Change, ChangeSet, ItemRepository, StorageError, UnitOfWork, modified_at};
use chrono::Utc;
use itemstore_core::types::{Item, NewItem, Page, PageRequest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

type Table = Arc<RwLock<HashMap<Uuid, Item>>>;

/// Process-local item store.
///
/// Commits take the write lock, verify every staged change against the
/// current versions and only then apply them, so a conflicting commit leaves
/// the table untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    items: Table,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[tonic::async_trait]
impl ItemRepository for MemoryRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(MemoryUnitOfWork {
            items: Arc::clone(&self.items),
            changes: ChangeSet::default(),
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.items.read().len() as u64)
    }

    async fn close(&self) {}
}

struct MemoryUnitOfWork {
    items: Table,
    changes: ChangeSet,
}

#[tonic::async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn save(&mut self, item: NewItem) -> Uuid {
        self.changes.insert(item)
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError> {
        Ok(self.items.read().get(&id).cloned())
    }

    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError> {
        let items = self.items.read();
        let mut ordered: Vec<&Item> = items.values().collect();
        ordered.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let window = ordered
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.page_size() as usize)
            .cloned()
            .collect();

        Ok(Page::new(window, items.len() as u64))
    }

    fn update(&mut self, item: Item) {
        self.changes.update(item);
    }

    fn delete(&mut self, item: Item) {
        self.changes.delete(item);
    }

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        let changes = self.changes.take();
        let now = Utc::now();
        let mut items = self.items.write();

        for change in &changes {
            match change {
                Change::Insert { id, .. } => {
                    if items.contains_key(id) {
                        return Err(StorageError::Conflict { id: *id });
                    }
                }
                Change::Update(item) | Change::Delete(item) => {
                    let current = items.get(&item.id).map(|stored| stored.version);
                    if current != Some(item.version) {
                        return Err(StorageError::Conflict { id: item.id });
                    }
                }
            }
        }

        let mut written = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                Change::Insert { id, name } => {
                    let item = Item {
                        id,
                        name,
                        created_at: now,
                        updated_at: None,
                        version: 1,
                    };
                    items.insert(id, item.clone());
                    written.push(item);
                }
                Change::Update(mut item) => {
                    item.updated_at = Some(modified_at(now, item.created_at));
                    item.version += 1;
                    items.insert(item.id, item.clone());
                    written.push(item);
                }
                Change::Delete(item) => {
                    items.remove(&item.id);
                }
            }
        }

        Ok(written)
    }
}
