//! Shared domain types, validation rules and the error taxonomy.
//!
//! ## Structure
//!
//! - [`error`] - domain error kinds and their mapping to gRPC statuses.
//! - [`types`] - the `Item` entity, pagination envelopes and CRUD operations.
//! - [`validation`] - request shape checks that run before any I/O.

pub mod error;
pub mod types;
pub mod validation;

pub use error::{Error, Result};
