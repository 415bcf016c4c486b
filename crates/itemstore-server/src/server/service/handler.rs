//! Item CRUD operations.
//!
//! [`ItemService`] holds the business logic behind every RPC. Each operation
//! runs the same sequence: validate, look up or stage, commit when mutating,
//! then map to the response message. A failing step stops the sequence, and
//! every failure leaves as a classified [`Error`]: storage errors are wrapped
//! into [`Error::DataAccess`] here, so no raw storage error ever reaches the
//! transport.

use crate::server::context::CallContext;
use crate::server::metrics::Metrics;
use crate::server::storage::{ItemRepository, StorageError};
use itemstore_core::{
    Error, Result,
    proto::{
        CreateItemResponse, DeleteItemRequest, DeleteItemResponse, GetItemRequest,
        GetItemResponse, GetItemsRequest, GetItemsResponse, Item as ItemMessage,
        UpdateItemResponse,
    },
    types::{ENTITY_TYPE, NewItem, Operation, PageRequest},
    validation::{
        ID_FIELD, validate_and_parse_id, validate_create, validate_pagination, validate_update,
    },
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

const CONFLICT_MESSAGE: &str =
    "The entity was modified by another user. Please refresh and try again.";

/// Business logic for the item RPCs.
///
/// Stateless per call: every operation obtains its own unit of work from the
/// shared repository and drops it when done.
#[derive(Clone)]
pub struct ItemService {
    repository: Arc<dyn ItemRepository>,
    metrics: Arc<Metrics>,
}

impl ItemService {
    pub fn new(repository: Arc<dyn ItemRepository>, metrics: Arc<Metrics>) -> Self {
        Self {
            repository,
            metrics,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ItemRepository> {
        &self.repository
    }

    /// Creates an item from a trimmed name. The id and creation time are
    /// assigned by storage.
    #[tracing::instrument(
        name = "create_item",
        skip_all,
        fields(operation = "create", entity_type = ENTITY_TYPE, correlation_id = %ctx.correlation_id())
    )]
    pub async fn create(
        &self,
        ctx: &CallContext,
        request: ItemMessage,
    ) -> Result<CreateItemResponse> {
        let started = Instant::now();
        validate_create(&request).inspect_err(|err| {
            tracing::warn!(
                name = %request.name,
                elapsed_ms = elapsed_ms(started),
                "Validation failed for CreateItem: {err}"
            );
        })?;

        let name = request.name.trim().to_owned();
        tracing::debug!(%name, user_id = ctx.user_id(), "Creating item");

        let mut uow = self.repository.unit_of_work();
        let id = uow.save(NewItem::new(name));
        let written = self
            .timed(Operation::Create, uow.commit())
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    elapsed_ms = elapsed_ms(started),
                    "Database error creating item"
                );
                Error::data_access(Operation::Create, "Failed to save entity to database.", err)
            })?;

        let item = written
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| {
                Error::data_access(
                    Operation::Create,
                    "An unexpected error occurred while creating the entity.",
                    "commit did not return the inserted item",
                )
            })?;

        tracing::info!(
            id = %item.id,
            elapsed_ms = elapsed_ms(started),
            "Successfully created item"
        );
        Ok(CreateItemResponse {
            item: Some(item.into()),
        })
    }

    /// Returns one page of items ordered by creation time.
    ///
    /// Page sizes are validated against 1000 and then clamped to 100 before
    /// the query, so `total_pages` is computed from the clamped size.
    #[tracing::instrument(
        name = "get_items",
        skip_all,
        fields(operation = "read", entity_type = ENTITY_TYPE, correlation_id = %ctx.correlation_id())
    )]
    pub async fn get_page(
        &self,
        ctx: &CallContext,
        request: GetItemsRequest,
    ) -> Result<GetItemsResponse> {
        let started = Instant::now();
        validate_pagination(&request).inspect_err(|err| {
            tracing::warn!(
                start_page = request.start_page,
                page_size = request.page_size,
                elapsed_ms = elapsed_ms(started),
                "Validation failed for GetItems: {err}"
            );
        })?;

        let page_request = PageRequest::clamped(request.start_page, request.page_size);
        tracing::debug!(
            start_page = page_request.start_page(),
            page_size = page_request.page_size(),
            "Fetching items"
        );

        let mut uow = self.repository.unit_of_work();
        let page = self
            .timed(Operation::Read, uow.find_page(page_request))
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    start_page = page_request.start_page(),
                    page_size = page_request.page_size(),
                    elapsed_ms = elapsed_ms(started),
                    "Database error fetching items"
                );
                Error::data_access(
                    Operation::Read,
                    "Failed to retrieve entities from database.",
                    err,
                )
            })?;

        let total_pages = page.total_pages(page_request.page_size());
        tracing::info!(
            count = page.items.len(),
            total = page.total_elements,
            elapsed_ms = elapsed_ms(started),
            "Fetched items"
        );

        Ok(GetItemsResponse {
            total_elements: i64::try_from(page.total_elements).unwrap_or(i64::MAX),
            total_pages: i32::try_from(total_pages).unwrap_or(i32::MAX),
            items: page.items.into_iter().map(Into::into).collect(),
        })
    }

    #[tracing::instrument(
        name = "get_item",
        skip_all,
        fields(operation = "read", entity_type = ENTITY_TYPE, correlation_id = %ctx.correlation_id(), id = %request.id)
    )]
    pub async fn get_one(
        &self,
        ctx: &CallContext,
        request: GetItemRequest,
    ) -> Result<GetItemResponse> {
        let started = Instant::now();
        let id = validate_and_parse_id(&request.id, ID_FIELD).inspect_err(|err| {
            tracing::warn!(
                elapsed_ms = elapsed_ms(started),
                "Validation failed for GetItem: {err}"
            );
        })?;

        let mut uow = self.repository.unit_of_work();
        let item = self
            .timed(Operation::Read, uow.find_by_id(id))
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    elapsed_ms = elapsed_ms(started),
                    "Database error fetching item"
                );
                Error::data_access(
                    Operation::Read,
                    "Failed to retrieve entity from database.",
                    err,
                )
            })?
            .ok_or_else(|| {
                tracing::warn!(elapsed_ms = elapsed_ms(started), "Item not found");
                Error::not_found(ENTITY_TYPE, id)
            })?;

        tracing::debug!(name = %item.name, elapsed_ms = elapsed_ms(started), "Found item");
        Ok(GetItemResponse {
            item: Some(item.into()),
        })
    }

    /// Renames an item.
    ///
    /// Renaming an item to its current name is a no-op: nothing is written
    /// and `updated_at` is left untouched.
    #[tracing::instrument(
        name = "update_item",
        skip_all,
        fields(operation = "update", entity_type = ENTITY_TYPE, correlation_id = %ctx.correlation_id(), id = %request.id)
    )]
    pub async fn update(
        &self,
        ctx: &CallContext,
        request: ItemMessage,
    ) -> Result<UpdateItemResponse> {
        let started = Instant::now();
        let id = validate_update(&request)
            .and_then(|()| validate_and_parse_id(&request.id, ID_FIELD))
            .inspect_err(|err| {
                tracing::warn!(
                    elapsed_ms = elapsed_ms(started),
                    "Validation failed for UpdateItem: {err}"
                );
            })?;

        let mut uow = self.repository.unit_of_work();
        let mut item = self
            .timed(Operation::Read, uow.find_by_id(id))
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    elapsed_ms = elapsed_ms(started),
                    "Unexpected error updating item"
                );
                Error::data_access(
                    Operation::Update,
                    "An unexpected error occurred while updating the entity.",
                    err,
                )
            })?
            .ok_or_else(|| {
                tracing::warn!(elapsed_ms = elapsed_ms(started), "Item not found for update");
                Error::not_found(ENTITY_TYPE, id)
            })?;

        let name = request.name.trim();
        if item.name == name {
            tracing::debug!(elapsed_ms = elapsed_ms(started), "No changes detected");
            return Ok(UpdateItemResponse {
                item: Some(item.into()),
            });
        }

        let old_name = std::mem::replace(&mut item.name, name.to_owned());
        uow.update(item);
        let written = self
            .timed(Operation::Update, uow.commit())
            .await
            .map_err(|err| match err {
                StorageError::Conflict { .. } => {
                    tracing::warn!(
                        error = %err,
                        elapsed_ms = elapsed_ms(started),
                        "Concurrency conflict updating item"
                    );
                    Error::data_access(Operation::Update, CONFLICT_MESSAGE, err)
                }
                err => {
                    tracing::error!(
                        error = %err,
                        elapsed_ms = elapsed_ms(started),
                        "Database error updating item"
                    );
                    Error::data_access(
                        Operation::Update,
                        "Failed to update entity in database.",
                        err,
                    )
                }
            })?;

        let item = written
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| {
                Error::data_access(
                    Operation::Update,
                    "An unexpected error occurred while updating the entity.",
                    "commit did not return the updated item",
                )
            })?;

        tracing::info!(
            %old_name,
            new_name = %item.name,
            elapsed_ms = elapsed_ms(started),
            "Updated item"
        );
        Ok(UpdateItemResponse {
            item: Some(item.into()),
        })
    }

    #[tracing::instrument(
        name = "delete_item",
        skip_all,
        fields(operation = "delete", entity_type = ENTITY_TYPE, correlation_id = %ctx.correlation_id(), id = %request.id)
    )]
    pub async fn delete(
        &self,
        ctx: &CallContext,
        request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse> {
        let started = Instant::now();
        let id = validate_and_parse_id(&request.id, ID_FIELD).inspect_err(|err| {
            tracing::warn!(
                elapsed_ms = elapsed_ms(started),
                "Validation failed for DeleteItem: {err}"
            );
        })?;

        let mut uow = self.repository.unit_of_work();
        let item = self
            .timed(Operation::Read, uow.find_by_id(id))
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    elapsed_ms = elapsed_ms(started),
                    "Unexpected error deleting item"
                );
                Error::data_access(
                    Operation::Delete,
                    "An unexpected error occurred while deleting the entity.",
                    err,
                )
            })?
            .ok_or_else(|| {
                tracing::warn!(elapsed_ms = elapsed_ms(started), "Item not found for deletion");
                Error::not_found(ENTITY_TYPE, id)
            })?;

        let name = item.name.clone();
        uow.delete(item);
        self.timed(Operation::Delete, uow.commit())
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    elapsed_ms = elapsed_ms(started),
                    "Database error deleting item"
                );
                Error::data_access(
                    Operation::Delete,
                    "Failed to delete entity from database.",
                    err,
                )
            })?;

        tracing::info!(%name, elapsed_ms = elapsed_ms(started), "Deleted item");
        Ok(DeleteItemResponse { deleted: true })
    }

    async fn timed<T>(&self, operation: Operation, storage: impl Future<Output = T>) -> T {
        let started = Instant::now();
        let output = storage.await;
        self.metrics.record_database_operation(operation, started.elapsed());
        output
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
