use super::grpc::ItemEndpoint;
use super::handler::ItemService;
use crate::server::auth::{JwtValidator, TokenValidator};
use crate::server::metrics::Metrics;
use crate::server::pipeline::Pipeline;
use crate::server::storage::{ItemRepository, MemoryRepository, StorageError, UnitOfWork};
use itemstore_core::error::{DATA_ACCESS_ERROR, ENTITY_NOT_FOUND, VALIDATION_ERROR};
use itemstore_core::proto::item_service_server::ItemService as _;
use itemstore_core::proto::{
    DeleteItemRequest, GetItemRequest, GetItemsRequest, GetItemsResponse, Item as ItemMessage,
};
use itemstore_core::types::{Item, NewItem, Page, PageRequest};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tonic::{Code, Request, Status};
use uuid::Uuid;

const SECRET: &[u8] = b"service-test-secret-with-enough-entropy";

/// Memory storage that remembers every page request and counts commits.
#[derive(Default)]
struct RecordingRepository {
    inner: MemoryRepository,
    pages: Arc<Mutex<Vec<PageRequest>>>,
    commits: Arc<AtomicUsize>,
}

impl RecordingRepository {
    fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl ItemRepository for RecordingRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(RecordingUnitOfWork {
            inner: self.inner.unit_of_work(),
            pages: Arc::clone(&self.pages),
            commits: Arc::clone(&self.commits),
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.inner.count().await
    }

    async fn close(&self) {}
}

struct RecordingUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    pages: Arc<Mutex<Vec<PageRequest>>>,
    commits: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl UnitOfWork for RecordingUnitOfWork {
    fn save(&mut self, item: NewItem) -> Uuid {
        self.inner.save(item)
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError> {
        self.inner.find_by_id(id).await
    }

    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError> {
        self.pages.lock().push(request);
        self.inner.find_page(request).await
    }

    fn update(&mut self, item: Item) {
        self.inner.update(item);
    }

    fn delete(&mut self, item: Item) {
        self.inner.delete(item);
    }

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }
}

/// Storage whose every operation fails.
struct UnreachableRepository;

#[tonic::async_trait]
impl ItemRepository for UnreachableRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(UnreachableUnitOfWork)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Err(unreachable_error())
    }

    async fn close(&self) {}
}

struct UnreachableUnitOfWork;

#[tonic::async_trait]
impl UnitOfWork for UnreachableUnitOfWork {
    fn save(&mut self, _item: NewItem) -> Uuid {
        Uuid::new_v4()
    }

    async fn find_by_id(&mut self, _id: Uuid) -> Result<Option<Item>, StorageError> {
        Err(unreachable_error())
    }

    async fn find_page(&mut self, _request: PageRequest) -> Result<Page<Item>, StorageError> {
        Err(unreachable_error())
    }

    fn update(&mut self, _item: Item) {}

    fn delete(&mut self, _item: Item) {}

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        Err(unreachable_error())
    }
}

fn unreachable_error() -> StorageError {
    StorageError::Unavailable("connection refused by 10.0.0.7:5432".to_owned())
}

/// Memory storage where another writer renames an item right after this
/// call reads it, once.
struct RacingRepository {
    inner: MemoryRepository,
    rival_name: &'static str,
    raced: Arc<AtomicBool>,
}

impl RacingRepository {
    fn new(rival_name: &'static str) -> Self {
        Self {
            inner: MemoryRepository::new(),
            rival_name,
            raced: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[tonic::async_trait]
impl ItemRepository for RacingRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(RacingUnitOfWork {
            inner: self.inner.unit_of_work(),
            store: self.inner.clone(),
            rival_name: self.rival_name,
            raced: Arc::clone(&self.raced),
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.inner.count().await
    }

    async fn close(&self) {}
}

struct RacingUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    store: MemoryRepository,
    rival_name: &'static str,
    raced: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl UnitOfWork for RacingUnitOfWork {
    fn save(&mut self, item: NewItem) -> Uuid {
        self.inner.save(item)
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError> {
        let found = self.inner.find_by_id(id).await?;
        if let Some(item) = &found {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut rival = self.store.unit_of_work();
                let mut competing = item.clone();
                competing.name = self.rival_name.to_owned();
                rival.update(competing);
                rival.commit().await?;
            }
        }
        Ok(found)
    }

    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError> {
        self.inner.find_page(request).await
    }

    fn update(&mut self, item: Item) {
        self.inner.update(item);
    }

    fn delete(&mut self, item: Item) {
        self.inner.delete(item);
    }

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        self.inner.commit().await
    }
}

/// Memory storage that reads normally but refuses every commit.
#[derive(Default)]
struct ReadOnlyRepository {
    inner: MemoryRepository,
}

#[tonic::async_trait]
impl ItemRepository for ReadOnlyRepository {
    fn unit_of_work(&self) -> Box<dyn UnitOfWork> {
        Box::new(ReadOnlyUnitOfWork {
            inner: self.inner.unit_of_work(),
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.inner.count().await
    }

    async fn close(&self) {}
}

struct ReadOnlyUnitOfWork {
    inner: Box<dyn UnitOfWork>,
}

#[tonic::async_trait]
impl UnitOfWork for ReadOnlyUnitOfWork {
    fn save(&mut self, item: NewItem) -> Uuid {
        self.inner.save(item)
    }

    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Item>, StorageError> {
        self.inner.find_by_id(id).await
    }

    async fn find_page(&mut self, request: PageRequest) -> Result<Page<Item>, StorageError> {
        self.inner.find_page(request).await
    }

    fn update(&mut self, item: Item) {
        self.inner.update(item);
    }

    fn delete(&mut self, item: Item) {
        self.inner.delete(item);
    }

    async fn commit(&mut self) -> Result<Vec<Item>, StorageError> {
        Err(unreachable_error())
    }
}

async fn seed(store: &MemoryRepository, name: &str) -> Uuid {
    let mut uow = store.unit_of_work();
    let id = uow.save(NewItem::new(name));
    uow.commit().await.unwrap();
    id
}

struct Harness {
    endpoint: ItemEndpoint,
    metrics: Arc<Metrics>,
}

fn harness(repository: Arc<dyn ItemRepository>, secured: bool) -> Harness {
    let metrics = Arc::new(Metrics::new().unwrap());
    let validator = secured.then(|| Arc::new(JwtValidator::new(SECRET)) as Arc<dyn TokenValidator>);
    let pipeline = Pipeline::standard(Arc::clone(&metrics), validator);
    let service = ItemService::new(repository, Arc::clone(&metrics));
    Harness {
        endpoint: ItemEndpoint::new(service, pipeline),
        metrics,
    }
}

fn ephemeral() -> Harness {
    harness(Arc::new(MemoryRepository::new()), false)
}

fn token(role: &str) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({ "sub": format!("user-{role}"), "role": role }),
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

fn authorized<T>(message: T, role: Option<&str>) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(role) = role {
        request.metadata_mut().insert(
            "authorization",
            format!("Bearer {}", token(role)).parse().unwrap(),
        );
    }
    request
}

fn named(name: &str) -> ItemMessage {
    ItemMessage {
        name: name.to_owned(),
        ..Default::default()
    }
}

fn meta<'a>(status: &'a Status, key: &str) -> Option<&'a str> {
    status.metadata().get(key).and_then(|v| v.to_str().ok())
}

impl Harness {
    async fn create(&self, name: &str) -> ItemMessage {
        self.endpoint
            .create_item(Request::new(named(name)))
            .await
            .unwrap()
            .into_inner()
            .item
            .unwrap()
    }

    async fn page(&self, start_page: i32, page_size: i32) -> Result<GetItemsResponse, Status> {
        self.endpoint
            .get_items(Request::new(GetItemsRequest {
                start_page,
                page_size,
            }))
            .await
            .map(|response| response.into_inner())
    }

    async fn get(&self, id: &str) -> Result<ItemMessage, Status> {
        self.endpoint
            .get_item(Request::new(GetItemRequest { id: id.to_owned() }))
            .await
            .map(|response| response.into_inner().item.unwrap())
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let h = ephemeral();
    let created = h.create("  Widget  ").await;

    assert_eq!(created.name, "Widget");
    assert!(Uuid::parse_str(&created.id).is_ok());
    assert!(created.created_at.is_some());
    assert!(created.updated_at.is_none());

    let fetched = h.get(&created.id).await.unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn pages_split_the_collection() {
    let h = ephemeral();
    for n in 0..15 {
        h.create(&format!("item {n}")).await;
    }

    let first = h.page(1, 10).await.unwrap();
    assert_eq!(first.items.len(), 10);
    assert_eq!(first.total_elements, 15);
    assert_eq!(first.total_pages, 2);

    let second = h.page(2, 10).await.unwrap();
    assert_eq!(second.items.len(), 5);
    assert_eq!(second.total_pages, 2);

    let mut ids: Vec<_> = first.items.iter().chain(&second.items).map(|i| &i.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 15);

    let beyond = h.page(3, 10).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_elements, 15);
}

#[tokio::test]
async fn oversized_pages_are_clamped_before_storage() {
    let repository = Arc::new(RecordingRepository::default());
    let h = harness(repository.clone(), false);
    for n in 0..3 {
        h.create(&format!("item {n}")).await;
    }

    let page = h.page(1, 150).await.unwrap();
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.total_pages, 1);

    let recorded = repository.pages.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].page_size(), 100);
    assert_eq!(recorded[0].start_page(), 1);

    let status = h.page(1, 1001).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(repository.pages.lock().len(), 1);
}

#[tokio::test]
async fn renaming_updates_timestamp() {
    let h = ephemeral();
    let created = h.create("before").await;

    let updated = h
        .endpoint
        .update_item(Request::new(ItemMessage {
            id: created.id.clone(),
            name: " after ".to_owned(),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner()
        .item
        .unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name, "after");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at.is_some());
    assert_eq!(h.get(&created.id).await.unwrap().name, "after");
}

#[tokio::test]
async fn unchanged_name_writes_nothing() {
    let repository = Arc::new(RecordingRepository::default());
    let h = harness(repository.clone(), false);
    let created = h.create("same").await;
    assert_eq!(repository.commits(), 1);

    let updated = h
        .endpoint
        .update_item(Request::new(ItemMessage {
            id: created.id.clone(),
            name: "same ".to_owned(),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner()
        .item
        .unwrap();

    assert_eq!(repository.commits(), 1);
    assert!(updated.updated_at.is_none());
    assert_eq!(updated, created);
}

#[tokio::test]
async fn deleting_missing_item_is_not_found() {
    let repository = Arc::new(RecordingRepository::default());
    let h = harness(repository.clone(), false);
    let id = Uuid::new_v4().to_string();

    let status = h
        .endpoint
        .delete_item(Request::new(DeleteItemRequest { id: id.clone() }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), format!("Item with ID '{id}' was not found."));
    assert_eq!(meta(&status, "error-code"), Some(ENTITY_NOT_FOUND));
    assert_eq!(meta(&status, "entity-id"), Some(id.as_str()));
    assert_eq!(repository.commits(), 0);
}

#[tokio::test]
async fn deleted_items_are_gone() {
    let h = ephemeral();
    let created = h.create("short lived").await;

    let response = h
        .endpoint
        .delete_item(Request::new(DeleteItemRequest {
            id: created.id.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.deleted);

    assert_eq!(h.get(&created.id).await.unwrap_err().code(), Code::NotFound);
    assert_eq!(h.page(1, 10).await.unwrap().total_elements, 0);
}

#[tokio::test]
async fn create_reports_every_invalid_field() {
    let h = ephemeral();
    let status = h
        .endpoint
        .create_item(Request::new(ItemMessage {
            id: Uuid::new_v4().to_string(),
            name: "   ".to_owned(),
            ..Default::default()
        }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "One or more validation errors occurred.");
    assert_eq!(meta(&status, "error-code"), Some(VALIDATION_ERROR));

    let fields: serde_json::Value =
        serde_json::from_str(meta(&status, "validation-errors").unwrap()).unwrap();
    assert_eq!(fields["Name"][0], "Name is required and cannot be empty.");
    assert_eq!(fields["Id"][0], "ID should not be provided for create requests.");
    assert_eq!(h.page(1, 10).await.unwrap().total_elements, 0);
}

#[tokio::test]
async fn malformed_ids_are_rejected() {
    let h = ephemeral();
    for (id, message) in [
        ("", "Validation failed for field 'Id': Id is required and cannot be empty."),
        ("not-a-guid", "Validation failed for field 'Id': Id must be a valid GUID format."),
        (
            "00000000-0000-0000-0000-000000000000",
            "Validation failed for field 'Id': Id cannot be an empty GUID.",
        ),
    ] {
        let status = h.get(id).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument, "{id:?}");
        assert_eq!(status.message(), message);
    }
}

#[tokio::test]
async fn roles_gate_operations() {
    let h = harness(Arc::new(MemoryRepository::new()), true);
    let missing = Uuid::new_v4().to_string();

    let status = h
        .endpoint
        .get_items(authorized(GetItemsRequest { start_page: 1, page_size: 10 }, None))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    let reader = h
        .endpoint
        .get_items(authorized(GetItemsRequest { start_page: 1, page_size: 10 }, Some("read")))
        .await;
    assert!(reader.is_ok());

    let status = h
        .endpoint
        .create_item(authorized(named("nope"), Some("read")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), "Insufficient permissions for create operation");

    let created = h
        .endpoint
        .create_item(authorized(named("writer"), Some("write")))
        .await
        .unwrap()
        .into_inner()
        .item
        .unwrap();

    let status = h
        .endpoint
        .delete_item(authorized(DeleteItemRequest { id: created.id.clone() }, Some("write")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = h
        .endpoint
        .delete_item(authorized(DeleteItemRequest { id: missing }, Some("admin")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let deleted = h
        .endpoint
        .delete_item(authorized(DeleteItemRequest { id: created.id }, Some("admin")))
        .await
        .unwrap()
        .into_inner();
    assert!(deleted.deleted);
}

#[tokio::test]
async fn forged_tokens_are_rejected() {
    let h = harness(Arc::new(MemoryRepository::new()), true);
    let forged = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({ "sub": "mallory", "role": "admin" }),
        &EncodingKey::from_secret(b"not-the-server-secret"),
    )
    .unwrap();

    let mut request = Request::new(named("forged"));
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {forged}").parse().unwrap());

    let status = h.endpoint.create_item(request).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn storage_failures_hide_details() {
    let h = harness(Arc::new(UnreachableRepository), false);

    let status = h.page(1, 10).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "Failed to retrieve the entity. Please try again.");
    assert_eq!(meta(&status, "error-code"), Some(DATA_ACCESS_ERROR));
    assert_eq!(meta(&status, "operation"), Some("Read"));
    assert!(!status.message().contains("10.0.0.7"));

    let status = h
        .endpoint
        .create_item(Request::new(named("lost")))
        .await
        .unwrap_err();
    assert_eq!(status.message(), "Failed to create the entity. Please try again.");
}

#[tokio::test]
async fn calls_are_counted() {
    let h = ephemeral();
    let created = h.create("counted").await;
    let _ = h.get("bogus").await;
    h.endpoint
        .delete_item(Request::new(DeleteItemRequest { id: created.id }))
        .await
        .unwrap();

    let rendered = h.metrics.render();
    for line in [
        r#"itemstore_requests_total{method="CreateItem",status="success"} 1"#,
        r#"itemstore_requests_total{method="GetItem",status="invalid_argument"} 1"#,
        r#"itemstore_validation_errors_total{method="GetItem"} 1"#,
        "itemstore_entities_created_total 1",
        "itemstore_entities_deleted_total 1",
    ] {
        assert!(rendered.lines().any(|l| l == line), "missing {line}\n{rendered}");
    }
    assert_eq!(h.metrics.active_calls(), 0);
}

#[tokio::test]
async fn concurrent_rename_is_not_overwritten() {
    let repository = Arc::new(RacingRepository::new("theirs"));
    let id = seed(&repository.inner, "original").await;
    let h = harness(repository.clone(), false);

    let status = h
        .endpoint
        .update_item(Request::new(ItemMessage {
            id: id.to_string(),
            name: "ours".to_owned(),
            ..Default::default()
        }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "Failed to update the entity. Please try again.");
    assert_eq!(meta(&status, "error-code"), Some(DATA_ACCESS_ERROR));
    assert_eq!(meta(&status, "operation"), Some("Update"));

    let stored = h.get(&id.to_string()).await.unwrap();
    assert_eq!(stored.name, "theirs");
}

#[tokio::test]
async fn failed_delete_commit_keeps_the_item() {
    let repository = Arc::new(ReadOnlyRepository::default());
    let id = seed(&repository.inner, "keeper").await;
    let h = harness(repository.clone(), false);

    let status = h
        .endpoint
        .delete_item(Request::new(DeleteItemRequest { id: id.to_string() }))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "Failed to delete the entity. Please try again.");
    assert_eq!(meta(&status, "error-code"), Some(DATA_ACCESS_ERROR));
    assert_eq!(meta(&status, "operation"), Some("Delete"));
    assert!(!status.message().contains("10.0.0.7"));
    assert_eq!(h.get(&id.to_string()).await.unwrap().name, "keeper");
}
