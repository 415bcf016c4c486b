//! Converts every fault leaving the handler into a final gRPC status.
//!
//! Domain errors go through the fixed mapping in `itemstore_core::error`,
//! statuses pass through unchanged, and anything unclassified (including a
//! panicking handler) becomes `Internal` with only its kind exposed. Each
//! fault is logged once here with the call's correlation id.

use super::{BoxFuture, CallResult, Fault, Middleware, Next};
use crate::server::context::CallContext;
use futures::FutureExt;
use itemstore_core::error::Error;
use std::any::Any;
use std::error::Error as _;
use std::panic::AssertUnwindSafe;

pub const PANIC_KIND: &str = "panic";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionMiddleware;

impl Middleware for ExceptionMiddleware {
    fn name(&self) -> &'static str {
        "exception"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let result = match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Fault::unclassified(PANIC_KIND, panic_message(&*payload))),
            };

            result.map_err(|fault| {
                log_fault(ctx, &fault);
                Fault::Status(fault.into_status())
            })
        })
    }
}

fn log_fault(ctx: &CallContext, fault: &Fault) {
    let method = ctx.method_name();
    let correlation_id = ctx.correlation_id();
    match fault {
        Fault::Domain(err @ Error::Validation { errors, .. }) => {
            tracing::warn!(
                method,
                %correlation_id,
                fields = %errors.to_json(),
                "Validation error: {err}"
            );
        }
        Fault::Domain(err @ Error::NotFound { .. }) => {
            tracing::warn!(method, %correlation_id, "Entity not found: {err}");
        }
        Fault::Domain(err @ Error::BusinessRule { rule_name, .. }) => {
            tracing::warn!(
                method,
                %correlation_id,
                rule_name = rule_name.as_str(),
                "Business rule violation: {err}"
            );
        }
        Fault::Domain(err @ Error::DataAccess { operation, .. }) => {
            let source = err.source().map(ToString::to_string).unwrap_or_default();
            tracing::error!(
                method,
                %correlation_id,
                %operation,
                %source,
                "Data access error: {err}"
            );
        }
        Fault::Status(status) => {
            tracing::warn!(
                method,
                %correlation_id,
                code = ?status.code(),
                "Call failed: {}",
                status.message()
            );
        }
        Fault::Unclassified { kind, message } => {
            tracing::error!(method, %correlation_id, kind, "Unhandled error: {message}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
