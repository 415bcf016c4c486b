//! Transport adapter for the generated `ItemService` server trait.

use super::handler::ItemService;
use crate::server::context::CallContext;
use crate::server::pipeline::Pipeline;
use itemstore_core::Result;
use itemstore_core::proto::{
    self, CreateItemResponse, DeleteItemRequest, DeleteItemResponse, GetItemRequest,
    GetItemResponse, GetItemsRequest, GetItemsResponse, Item, UpdateItemResponse,
    item_service_server::{ItemService as ItemRpc, ItemServiceServer},
};
use std::future::Future;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};

/// Implements the generated server trait by running each call through the
/// pipeline and into [`ItemService`].
#[derive(Clone)]
pub struct ItemEndpoint {
    service: Arc<ItemService>,
    pipeline: Pipeline,
}

impl ItemEndpoint {
    pub fn new(service: ItemService, pipeline: Pipeline) -> Self {
        Self {
            service: Arc::new(service),
            pipeline,
        }
    }

    /// Wraps the endpoint in the generated server with zstd, gzip and
    /// deflate enabled in both directions.
    pub fn into_server(self) -> ItemServiceServer<Self> {
        ItemServiceServer::new(self)
            .send_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Deflate)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate)
    }

    async fn dispatch<Req, Res, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        handler: F,
    ) -> std::result::Result<Response<Res>, Status>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: FnOnce(Arc<ItemService>, CallContext, Req) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Res>> + Send + 'static,
    {
        let (metadata, _, message) = request.into_parts();
        let ctx = CallContext::new(proto::method_path(method), metadata);
        tracing::debug!(
            method,
            correlation_id = %ctx.correlation_id(),
            user_id = ctx.user_id(),
            "Handling call"
        );

        let service = Arc::clone(&self.service);
        self.pipeline
            .call(ctx, move |ctx| handler(service, ctx, message))
            .await
            .map(Response::new)
    }
}

#[tonic::async_trait]
impl ItemRpc for ItemEndpoint {
    async fn create_item(
        &self,
        request: Request<Item>,
    ) -> std::result::Result<Response<CreateItemResponse>, Status> {
        self.dispatch("CreateItem", request, |service, ctx, message| async move {
            service.create(&ctx, message).await
        })
        .await
    }

    async fn get_items(
        &self,
        request: Request<GetItemsRequest>,
    ) -> std::result::Result<Response<GetItemsResponse>, Status> {
        self.dispatch("GetItems", request, |service, ctx, message| async move {
            service.get_page(&ctx, message).await
        })
        .await
    }

    async fn get_item(
        &self,
        request: Request<GetItemRequest>,
    ) -> std::result::Result<Response<GetItemResponse>, Status> {
        self.dispatch("GetItem", request, |service, ctx, message| async move {
            service.get_one(&ctx, message).await
        })
        .await
    }

    async fn update_item(
        &self,
        request: Request<Item>,
    ) -> std::result::Result<Response<UpdateItemResponse>, Status> {
        self.dispatch("UpdateItem", request, |service, ctx, message| async move {
            service.update(&ctx, message).await
        })
        .await
    }

    async fn delete_item(
        &self,
        request: Request<DeleteItemRequest>,
    ) -> std::result::Result<Response<DeleteItemResponse>, Status> {
        self.dispatch("DeleteItem", request, |service, ctx, message| async move {
            service.delete(&ctx, message).await
        })
        .await
    }
}
