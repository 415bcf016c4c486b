//! Claims-based authorization.
//!
//! Authentication happens upstream at the API gateway. This service only
//! verifies that a bearer token was signed with the shared secret, extracts
//! its claims into a [`UserContext`] and decides whether the caller may
//! perform the [`Operation`] implied by the method name.
//!
//! ## Decision table
//!
//! | Operation | Permission | Roles                   |
//! |-----------|------------|-------------------------|
//! | create    | `create`   | `admin`, `write`        |
//! | read      | `read`     | `admin`, `write`, `read`|
//! | update    | `update`   | `admin`, `write`        |
//! | delete    | `delete`   | `admin`                 |
//!
//! A caller is authorized when it holds the permission named after the
//! operation or any of the listed roles.

pub mod token;

use itemstore_core::types::Operation;
use std::collections::HashSet;
use tonic::metadata::MetadataMap;

pub use token::JwtValidator;

/// Methods that never require a token.
pub const PUBLIC_METHODS: [&str; 3] = [
    "/grpc.health.v1.Health/Check",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

const BEARER_PREFIX: &str = "bearer ";

/// Verified identity and grants of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: Option<String>,
    pub client_id: Option<String>,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Whether the caller may perform `operation`.
    pub fn allows(&self, operation: Operation) -> bool {
        self.permissions.contains(operation.as_str())
            || allowed_roles(operation)
                .iter()
                .any(|role| self.roles.contains(*role))
    }

    /// [`allows`](Self::allows) for an operation given by name. Names other
    /// than create/read/update/delete are always denied.
    pub fn is_authorized(&self, operation: &str) -> bool {
        operation
            .parse::<Operation>()
            .is_ok_and(|operation| self.allows(operation))
    }
}

/// Roles that grant `operation` without an explicit permission.
pub const fn allowed_roles(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::Create | Operation::Update => &["admin", "write"],
        Operation::Read => &["admin", "write", "read"],
        Operation::Delete => &["admin"],
    }
}

/// Verifies bearer tokens.
///
/// Implementations return `None` for any token that is malformed or carries
/// a bad signature. They must not report failures any other way.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str) -> Option<UserContext>;
}

pub fn is_public_method(method: &str) -> bool {
    PUBLIC_METHODS
        .iter()
        .any(|public| public.eq_ignore_ascii_case(method))
}

/// Extracts the token from the `authorization` entry, with or without a
/// case-insensitive `Bearer ` prefix. Blank values count as missing.
pub fn bearer_token(metadata: &MetadataMap) -> Option<&str> {
    let value = metadata.get("authorization")?.to_str().ok()?;
    let token = match value.get(..BEARER_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(BEARER_PREFIX) => {
            value[BEARER_PREFIX.len()..].trim()
        }
        _ => value.trim(),
    };
    (!token.is_empty()).then_some(token)
}
