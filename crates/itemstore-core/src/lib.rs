#![doc = include_str!("../README.md")]

pub mod client;
mod common;
pub use common::*;

/// Generated protobuf messages and tonic client/server bindings for
/// `proto/itemstore.proto`.
///
/// ## Service
///
/// - `CreateItem` - stores a new item and returns it with its assigned id.
/// - `GetItems` - returns one page of items plus the unfiltered total.
/// - `GetItem` - fetches one item by id.
/// - `UpdateItem` - renames an item.
/// - `DeleteItem` - removes an item.
///
/// [`FILE_DESCRIPTOR_SET`] is the encoded descriptor set used to serve gRPC
/// reflection.
pub mod proto {
    tonic::include_proto!("itemstore.v1");

    /// Encoded `FileDescriptorSet` for the `itemstore.v1` package.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("itemstore_descriptor");

    /// Fully qualified gRPC service name.
    pub const SERVICE_NAME: &str = "itemstore.v1.ItemService";

    /// Builds the `/package.Service/Method` path used for routing and
    /// authorization decisions.
    pub fn method_path(method: &str) -> String {
        format!("/{SERVICE_NAME}/{method}")
    }
}
