//! Bearer token authorization stage.
//!
//! Public methods pass straight through. Every other call must carry a
//! token that the configured [`TokenValidator`] accepts and whose claims
//! allow the operation inferred from the method name. On success the
//! verified [`UserContext`](crate::server::auth::UserContext) is attached to
//! the call context.

use super::{BoxFuture, CallResult, Middleware, Next};
use crate::server::auth::{TokenValidator, bearer_token, is_public_method};
use crate::server::context::CallContext;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tonic::Status;
use tracing::Instrument;

pub const TOKEN_REQUIRED: &str = "Authorization token required";
pub const INVALID_TOKEN: &str = "Invalid authorization token";
pub const SERVICE_ERROR: &str = "Authorization service error";

pub struct AuthorizationMiddleware {
    validator: Arc<dyn TokenValidator>,
}

impl AuthorizationMiddleware {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self { validator }
    }
}

impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if is_public_method(ctx.method()) {
                return next.run(ctx).await;
            }

            let operation = ctx.operation();
            let Some(token) = bearer_token(ctx.metadata()) else {
                tracing::warn!(method = ctx.method(), "No authorization token provided");
                return Err(Status::unauthenticated(TOKEN_REQUIRED).into());
            };

            let user = match catch_unwind(AssertUnwindSafe(|| self.validator.validate(token))) {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(method = ctx.method(), "Invalid authorization token");
                    return Err(Status::unauthenticated(INVALID_TOKEN).into());
                }
                Err(_) => {
                    tracing::error!(method = ctx.method(), "Token validator panicked");
                    return Err(Status::internal(SERVICE_ERROR).into());
                }
            };

            if !user.allows(operation) {
                tracing::warn!(
                    user_id = %user.user_id,
                    %operation,
                    method = ctx.method(),
                    "User not authorized for operation"
                );
                return Err(Status::permission_denied(format!(
                    "Insufficient permissions for {operation} operation"
                ))
                .into());
            }

            let span = tracing::info_span!(
                "authorized",
                user_id = %user.user_id,
                user_name = user.user_name.as_deref().unwrap_or_default(),
                client_id = user.client_id.as_deref().unwrap_or_default(),
            );
            tracing::debug!(user_id = %user.user_id, %operation, "User authorized");
            ctx.set_user(user);
            next.run(ctx).instrument(span).await
        })
    }
}
