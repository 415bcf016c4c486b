//! Typed client for the `ItemService` gRPC API.
//!
//! [`ItemClient`] wraps the generated tonic client, attaches the bearer token
//! to every call and unwraps response envelopes into plain messages.

use crate::proto::{
    self, DeleteItemRequest, GetItemRequest, GetItemsRequest, GetItemsResponse,
    item_service_client::ItemServiceClient,
};
use tonic::codegen::StdError;
use tonic::metadata::{AsciiMetadataValue, errors::InvalidMetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

#[derive(Clone, Debug)]
pub struct ItemClient {
    inner: ItemServiceClient<Channel>,
    authorization: Option<AsciiMetadataValue>,
}

impl ItemClient {
    /// Connects to a server, e.g. `http://127.0.0.1:50051`.
    pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<StdError>,
    {
        let inner = ItemServiceClient::connect(dst).await?;
        Ok(Self::new(inner))
    }

    pub fn new(inner: ItemServiceClient<Channel>) -> Self {
        Self {
            inner,
            authorization: None,
        }
    }

    /// Sends `token` as `authorization: Bearer <token>` on every call.
    pub fn with_token(mut self, token: &str) -> Result<Self, InvalidMetadataValue> {
        self.authorization = Some(format!("Bearer {token}").parse()?);
        Ok(self)
    }

    pub async fn create_item(&mut self, name: impl Into<String>) -> Result<proto::Item, Status> {
        let request = self.request(proto::Item {
            name: name.into(),
            ..Default::default()
        });
        let response = self.inner.create_item(request).await?.into_inner();
        response.item.ok_or_else(missing_item)
    }

    pub async fn get_items(
        &mut self,
        start_page: i32,
        page_size: i32,
    ) -> Result<GetItemsResponse, Status> {
        let request = self.request(GetItemsRequest {
            start_page,
            page_size,
        });
        Ok(self.inner.get_items(request).await?.into_inner())
    }

    pub async fn get_item(&mut self, id: impl Into<String>) -> Result<proto::Item, Status> {
        let request = self.request(GetItemRequest { id: id.into() });
        let response = self.inner.get_item(request).await?.into_inner();
        response.item.ok_or_else(missing_item)
    }

    pub async fn update_item(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<proto::Item, Status> {
        let request = self.request(proto::Item {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        });
        let response = self.inner.update_item(request).await?.into_inner();
        response.item.ok_or_else(missing_item)
    }

    pub async fn delete_item(&mut self, id: impl Into<String>) -> Result<bool, Status> {
        let request = self.request(DeleteItemRequest { id: id.into() });
        Ok(self.inner.delete_item(request).await?.into_inner().deleted)
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert("authorization", value.clone());
        }
        request
    }
}

fn missing_item() -> Status {
    Status::internal("response did not contain an item")
}
