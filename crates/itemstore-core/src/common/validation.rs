//! Request validation.
//!
//! Every check here is pure and runs before any I/O. Failures are collected
//! per field so a single response can describe every problem with a request.

use crate::error::{Error, Result, ValidationErrors};
use crate::proto;
use crate::types::{MAX_NAME_LENGTH, MAX_REQUESTED_PAGE_SIZE};
use uuid::Uuid;

pub const NAME_FIELD: &str = "Name";
pub const ID_FIELD: &str = "Id";
pub const START_PAGE_FIELD: &str = "StartPage";
pub const PAGE_SIZE_FIELD: &str = "PageSize";

/// Validates a create request: a well-formed name and no client-supplied id.
pub fn validate_create(request: &proto::Item) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if let Some(message) = check_name(&request.name) {
        errors.add(NAME_FIELD, message);
    }
    if !request.id.is_empty() {
        errors.add(ID_FIELD, "ID should not be provided for create requests.");
    }

    errors.into_result()
}

/// Validates an update request: a parseable id and a well-formed name.
pub fn validate_update(request: &proto::Item) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if request.id.trim().is_empty() {
        errors.add(ID_FIELD, "ID is required for update requests.");
    } else if Uuid::parse_str(request.id.trim()).is_err() {
        errors.add(ID_FIELD, "ID must be a valid GUID format.");
    }
    if let Some(message) = check_name(&request.name) {
        errors.add(NAME_FIELD, message);
    }

    errors.into_result()
}

/// Validates raw pagination values. Page sizes up to
/// [`MAX_REQUESTED_PAGE_SIZE`] are accepted here even though the service
/// clamps them further.
pub fn validate_pagination(request: &proto::GetItemsRequest) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if request.start_page < 1 {
        errors.add(START_PAGE_FIELD, "StartPage must be greater than 0.");
    }
    if request.page_size < 1 {
        errors.add(PAGE_SIZE_FIELD, "PageSize must be greater than 0.");
    } else if request.page_size > MAX_REQUESTED_PAGE_SIZE {
        errors.add(PAGE_SIZE_FIELD, "PageSize cannot exceed 1000.");
    }

    errors.into_result()
}

/// Parses `id` as a UUID, rejecting blank input, malformed input and the nil
/// UUID. Errors name `field`.
pub fn validate_and_parse_id(id: &str, field: &str) -> Result<Uuid> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::invalid_field(
            field,
            format!("{field} is required and cannot be empty."),
        ));
    }

    let parsed = Uuid::parse_str(id).map_err(|_| {
        Error::invalid_field(field, format!("{field} must be a valid GUID format."))
    })?;

    if parsed.is_nil() {
        return Err(Error::invalid_field(
            field,
            format!("{field} cannot be an empty GUID."),
        ));
    }

    Ok(parsed)
}

/// [`validate_and_parse_id`] for the default `Id` field.
pub fn parse_id(id: &str) -> Result<Uuid> {
    validate_and_parse_id(id, ID_FIELD)
}

/// Returns the first rule `name` breaks, if any.
pub fn check_name(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("Name is required and cannot be empty.")
    } else if name.chars().count() > MAX_NAME_LENGTH {
        Some("Name cannot exceed 100 characters.")
    } else if !name.chars().all(is_name_char) {
        Some(
            "Name contains invalid characters. Only letters, numbers, spaces, hyphens, underscores, and dots are allowed.",
        )
    } else {
        None
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.')
}
