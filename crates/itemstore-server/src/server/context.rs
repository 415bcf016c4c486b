//! Per-call context.
//!
//! A [`CallContext`] is created by the transport adapter for every inbound
//! call and passed explicitly through each middleware into the service. It
//! carries the correlation id, the caller identity and the inferred
//! operation, so nothing about the current call lives in ambient state.

use crate::server::auth::UserContext;
use itemstore_core::types::Operation;
use tonic::metadata::MetadataMap;
use uuid::Uuid;

const CORRELATION_ID_KEYS: [&str; 2] = ["x-correlation-id", "x-request-id"];
const USER_ID_KEYS: [&str; 2] = ["user-id", "x-user-id"];

#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    operation: Operation,
    correlation_id: Uuid,
    metadata: MetadataMap,
    user_id: Option<String>,
    user: Option<UserContext>,
}

impl CallContext {
    /// Builds the context for a call to `method` (a full
    /// `/package.Service/Method` path).
    ///
    /// A UUID supplied in `x-correlation-id` or `x-request-id` is reused as
    /// the correlation id; otherwise a fresh one is generated. The caller id
    /// starts out as whatever the `user-id` or `x-user-id` entry claims and is
    /// replaced once a token has been verified.
    pub fn new(method: impl Into<String>, metadata: MetadataMap) -> Self {
        let method = method.into();
        let correlation_id = CORRELATION_ID_KEYS
            .iter()
            .find_map(|key| first_ascii(&metadata, key))
            .and_then(|value| Uuid::parse_str(value).ok())
            .unwrap_or_else(Uuid::new_v4);
        let user_id = USER_ID_KEYS
            .iter()
            .find_map(|key| first_ascii(&metadata, key))
            .map(str::to_owned);

        Self {
            operation: Operation::from_method(&method),
            method,
            correlation_id,
            metadata,
            user_id,
            user: None,
        }
    }

    /// Full method path, e.g. `/itemstore.v1.ItemService/GetItem`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Final path segment, e.g. `GetItem`.
    pub fn method_name(&self) -> &str {
        self.method.rsplit('/').next().unwrap_or(&self.method)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    /// Records the verified caller. The verified user id wins over any id
    /// asserted in request metadata.
    pub fn set_user(&mut self, user: UserContext) {
        self.user_id = Some(user.user_id.clone());
        self.user = Some(user);
    }
}

fn first_ascii<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
