//! # Item Domain Types
//!
//! This module defines the entity managed by the service along with the
//! pagination contract shared by the service layer and the storage backends.
//!
//! ## Overview
//!
//! - [`Item`] - the stored entity, including its optimistic concurrency token
//! - [`NewItem`] - an item staged for insertion (no id, no timestamps)
//! - [`PageRequest`] - an already-normalized page window
//! - [`Page`] - a window of items plus the unfiltered total
//! - [`Operation`] - the CRUD class of a call, used for authorization, metrics
//!   and data-access error reporting
//!
//! ## Page bounds
//!
//! Requests are validated against [`MAX_REQUESTED_PAGE_SIZE`] and later
//! clamped to [`MAX_PAGE_SIZE`]. A page size between the two passes
//! validation and is silently reduced.

use crate::proto;
use chrono::{DateTime, Utc};
use core::fmt;
use core::str::FromStr;
use uuid::Uuid;

/// Entity type name reported in not-found errors and metadata.
pub const ENTITY_TYPE: &str = "Item";

/// Maximum length of an item name, in characters.
pub const MAX_NAME_LENGTH: usize = 100;

/// Largest page size accepted by request validation.
pub const MAX_REQUESTED_PAGE_SIZE: i32 = 1000;

/// Largest page size ever sent to storage.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A stored item.
///
/// `created_at` is assigned once when the insert is committed. `updated_at`
/// stays `None` until the first committed modification. `version` is the
/// optimistic concurrency token checked by storage on update and delete; it
/// never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// An item staged for insertion. Storage assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
}

impl NewItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A normalized page window.
///
/// Only constructible through [`PageRequest::clamped`], so storage always
/// receives a 1-based start page and a page size in `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    start_page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Clamps raw request values: `start_page` to at least 1 and `page_size`
    /// to `1..=MAX_PAGE_SIZE`.
    pub fn clamped(start_page: i32, page_size: i32) -> Self {
        Self {
            start_page: start_page.max(1) as u32,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE as i32) as u32,
        }
    }

    pub const fn start_page(&self) -> u32 {
        self.start_page
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of items to skip: `(start_page - 1) * page_size`.
    pub const fn offset(&self) -> u64 {
        (self.start_page as u64 - 1) * self.page_size as u64
    }
}

/// A window of results plus the total count of the unfiltered query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_elements: u64) -> Self {
        Self {
            items,
            total_elements,
        }
    }

    /// `ceil(total_elements / page_size)`.
    pub fn total_pages(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(u64::from(page_size))
    }
}

/// The CRUD class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    /// Lowercase name used for permissions, log fields and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Capitalized name carried in the `operation` error metadata entry.
    pub const fn label(&self) -> &'static str {
        match self {
            Operation::Create => "Create",
            Operation::Read => "Read",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        }
    }

    /// Infers the operation class from a gRPC method path such as
    /// `/itemstore.v1.ItemService/CreateItem`.
    ///
    /// Matching is a case-insensitive prefix test on the final path segment.
    /// Names that match no known prefix are treated as reads.
    pub fn from_method(path: &str) -> Self {
        let method = path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| method.starts_with(p));

        if starts(&["create"]) {
            Operation::Create
        } else if starts(&["get", "list", "find"]) {
            Operation::Read
        } else if starts(&["update", "patch"]) {
            Operation::Update
        } else if starts(&["delete", "remove"]) {
            Operation::Delete
        } else {
            Operation::Read
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an operation name outside create/read/update/delete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "read" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(UnknownOperation(s.to_owned())),
        }
    }
}

pub fn to_timestamp(at: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

impl From<Item> for proto::Item {
    fn from(item: Item) -> Self {
        Self {
            id: item.id.to_string(),
            name: item.name,
            created_at: Some(to_timestamp(item.created_at)),
            updated_at: item.updated_at.map(to_timestamp),
        }
    }
}
