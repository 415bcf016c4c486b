//! Error taxonomy for the item store.
//!
//! This module defines the central [`Error`] enum, which classifies every
//! failure the service layer can report. `From<Error>` for `tonic::Status` is
//! the single, deterministic mapping from error kind to gRPC status code and
//! metadata.
//!
//! ## Error Cases
//! - `Validation`: malformed client input, keyed by field
//!   (`InvalidArgument`).
//! - `NotFound`: the referenced item does not exist (`NotFound`).
//! - `BusinessRule`: a domain invariant was violated (`FailedPrecondition`).
//! - `DataAccess`: a storage operation failed (`Internal`, with a generic
//!   client-safe message).
//!
//! Anything that does not fit these kinds is reported through
//! [`unclassified_status`].

use crate::types::Operation;
use serde::Serialize;
use std::collections::BTreeMap;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const ENTITY_NOT_FOUND: &str = "ENTITY_NOT_FOUND";
pub const BUSINESS_RULE_VIOLATION: &str = "BUSINESS_RULE_VIOLATION";
pub const DATA_ACCESS_ERROR: &str = "DATA_ACCESS_ERROR";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

const AGGREGATE_VALIDATION_MESSAGE: &str = "One or more validation errors occurred.";
const INTERNAL_MESSAGE: &str = "An internal error occurred. Please try again later.";

/// Field name to messages, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }

    /// `Ok(())` when no field failed, otherwise an aggregate
    /// [`Error::Validation`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(self))
        }
    }
}

/// Unified error type for the item store service layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more request fields failed validation.
    #[error("{message}")]
    Validation {
        message: String,
        errors: ValidationErrors,
    },

    /// The referenced entity does not exist.
    #[error("{entity_type} with ID '{entity_id}' was not found.")]
    NotFound {
        entity_type: &'static str,
        entity_id: String,
    },

    /// A domain rule rejected the request.
    #[error("{message}")]
    BusinessRule { rule_name: String, message: String },

    /// Storage failed while performing `operation`. `message` is for server
    /// logs only and never reaches clients.
    #[error("{message}")]
    DataAccess {
        operation: Operation,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Aggregate validation failure covering every field in `errors`.
    pub fn validation(errors: ValidationErrors) -> Self {
        Error::Validation {
            message: AGGREGATE_VALIDATION_MESSAGE.to_owned(),
            errors,
        }
    }

    /// Validation failure for a single field.
    pub fn invalid_field(field: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        let message = format!("Validation failed for field '{field}': {error}");
        let mut errors = ValidationErrors::new();
        errors.add(field, error);
        Error::Validation { message, errors }
    }

    pub fn not_found(entity_type: &'static str, entity_id: impl ToString) -> Self {
        Error::NotFound {
            entity_type,
            entity_id: entity_id.to_string(),
        }
    }

    pub fn business_rule(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BusinessRule {
            rule_name: rule_name.into(),
            message: message.into(),
        }
    }

    pub fn data_access(
        operation: Operation,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::DataAccess {
            operation,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Value of the `error-code` metadata entry.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => VALIDATION_ERROR,
            Error::NotFound { .. } => ENTITY_NOT_FOUND,
            Error::BusinessRule { .. } => BUSINESS_RULE_VIOLATION,
            Error::DataAccess { .. } => DATA_ACCESS_ERROR,
        }
    }

    /// gRPC status code for this error kind.
    pub const fn status_code(&self) -> Code {
        match self {
            Error::Validation { .. } => Code::InvalidArgument,
            Error::NotFound { .. } => Code::NotFound,
            Error::BusinessRule { .. } => Code::FailedPrecondition,
            Error::DataAccess { .. } => Code::Internal,
        }
    }
}

/// Client-safe message reported for a failed storage operation.
pub const fn data_access_public_message(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "Failed to create the entity. Please try again.",
        Operation::Read => "Failed to retrieve the entity. Please try again.",
        Operation::Update => "Failed to update the entity. Please try again.",
        Operation::Delete => "Failed to delete the entity. Please try again.",
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let code = err.status_code();
        let mut metadata = MetadataMap::new();
        insert_ascii(&mut metadata, "error-code", err.error_code());

        let message = match err {
            Error::Validation { message, errors } => {
                insert_ascii(&mut metadata, "validation-errors", &errors.to_json());
                message
            }
            Error::NotFound {
                entity_type,
                entity_id,
            } => {
                let message = format!("{entity_type} with ID '{entity_id}' was not found.");
                insert_ascii(&mut metadata, "entity-type", entity_type);
                insert_ascii(&mut metadata, "entity-id", &entity_id);
                message
            }
            Error::BusinessRule { rule_name, message } => {
                insert_ascii(&mut metadata, "rule-name", &rule_name);
                message
            }
            Error::DataAccess { operation, .. } => {
                insert_ascii(&mut metadata, "operation", operation.label());
                data_access_public_message(operation).to_owned()
            }
        };

        Status::with_metadata(code, message, metadata)
    }
}

/// Status for a failure outside the domain taxonomy. Only the type name of
/// the failure is exposed.
pub fn unclassified_status(exception_type: &str) -> Status {
    let mut metadata = MetadataMap::new();
    insert_ascii(&mut metadata, "error-code", INTERNAL_ERROR);
    insert_ascii(&mut metadata, "exception-type", exception_type);
    Status::with_metadata(Code::Internal, INTERNAL_MESSAGE, metadata)
}

// Values that are not visible ASCII cannot travel as gRPC metadata and are
// dropped.
fn insert_ascii(metadata: &mut MetadataMap, key: &'static str, value: &str) {
    if let Ok(value) = AsciiMetadataValue::try_from(value) {
        metadata.insert(key, value);
    }
}
