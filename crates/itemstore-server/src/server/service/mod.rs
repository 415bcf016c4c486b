//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - business logic for every item operation (`ItemService`).
//! - [`grpc`] - the tonic adapter (`ItemEndpoint`) that builds a
//!   `CallContext` per call and runs the handler behind the middleware
//!   pipeline.

pub mod grpc;
pub mod handler;

#[cfg(test)]
mod tests;
