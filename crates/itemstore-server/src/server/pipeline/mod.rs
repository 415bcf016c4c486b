//! Per-call middleware pipeline.
//!
//! Every gRPC call flows through an ordered chain of [`Middleware`] stages
//! before reaching its handler:
//!
//! ```text
//! call -> Metrics -> Authorization -> Exception -> handler
//! ```
//!
//! Authorization is left out in ephemeral mode. Each stage receives the
//! explicit [`CallContext`] and a [`Next`] continuation, and may
//! short-circuit by returning without running it.
//!
//! Handlers report failures as a [`Fault`]. By the time a result leaves
//! [`ExceptionMiddleware`] every fault has been converted to
//! [`Fault::Status`], so the outer stages only ever observe final statuses.

pub mod authorization;
pub mod exception;
pub mod metrics;

use crate::server::auth::TokenValidator;
use crate::server::context::CallContext;
use crate::server::metrics::Metrics;
use itemstore_core::error::{Error, unclassified_status};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Code, Status};

pub use authorization::AuthorizationMiddleware;
pub use exception::ExceptionMiddleware;
pub use metrics::MetricsMiddleware;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased handler response. [`Pipeline::call`] restores the concrete
/// type.
pub type Reply = Box<dyn Any + Send>;

pub type CallResult = Result<Reply, Fault>;

type Endpoint = Box<dyn FnOnce(CallContext) -> BoxFuture<'static, CallResult> + Send>;

/// A failed call as seen by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// A classified service error, not yet mapped to a status.
    #[error(transparent)]
    Domain(#[from] Error),

    /// A final gRPC status.
    #[error(transparent)]
    Status(#[from] Status),

    /// Anything outside the domain taxonomy. Only `kind` is ever shown to
    /// the client.
    #[error("{kind}: {message}")]
    Unclassified { kind: &'static str, message: String },
}

impl Fault {
    pub fn unclassified(kind: &'static str, message: impl Into<String>) -> Self {
        Fault::Unclassified {
            kind,
            message: message.into(),
        }
    }

    /// Status code this fault resolves to.
    pub fn code(&self) -> Code {
        match self {
            Fault::Domain(err) => err.status_code(),
            Fault::Status(status) => status.code(),
            Fault::Unclassified { .. } => Code::Internal,
        }
    }

    pub fn into_status(self) -> Status {
        match self {
            Fault::Domain(err) => err.into(),
            Fault::Status(status) => status,
            Fault::Unclassified { kind, .. } => unclassified_status(kind),
        }
    }
}

/// A stage of the call pipeline.
///
/// Implementations call [`Next::run`] at most once. Returning without
/// calling it short-circuits the remaining stages and the handler.
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn process<'a>(
        &'a self,
        ctx: &'a mut CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult>;
}

/// Continuation over the remaining stages and the handler.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: Endpoint,
}

impl Next<'_> {
    /// Runs the remaining stages, then the handler with a snapshot of `ctx`.
    pub async fn run(self, ctx: &mut CallContext) -> CallResult {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middleware: rest,
                    endpoint: self.endpoint,
                };
                current.process(ctx, next).await
            }
            None => (self.endpoint)(ctx.clone()).await,
        }
    }
}

/// An immutable, ordered chain of stages shared by every call.
#[derive(Clone)]
pub struct Pipeline {
    middleware: Arc<[Arc<dyn Middleware>]>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The production chain. Passing no validator disables authorization.
    pub fn standard(metrics: Arc<Metrics>, validator: Option<Arc<dyn TokenValidator>>) -> Self {
        let mut builder = Self::builder().stage(MetricsMiddleware::new(metrics));
        if let Some(validator) = validator {
            builder = builder.stage(AuthorizationMiddleware::new(validator));
        }
        builder.stage(ExceptionMiddleware).build()
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|stage| stage.name()).collect()
    }

    /// Runs `handler` behind every stage and converts the outcome into what
    /// the transport returns.
    pub async fn call<T, F, Fut, E>(&self, mut ctx: CallContext, handler: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Fault>,
    {
        let endpoint: Endpoint = Box::new(move |ctx| {
            Box::pin(async move {
                handler(ctx)
                    .await
                    .map(|reply| Box::new(reply) as Reply)
                    .map_err(Into::into)
            })
        });
        let next = Next {
            middleware: &self.middleware,
            endpoint,
        };

        match next.run(&mut ctx).await {
            Ok(reply) => match reply.downcast::<T>() {
                Ok(reply) => Ok(*reply),
                Err(_) => {
                    tracing::error!(method = ctx.method(), "Handler reply had an unexpected type");
                    Err(unclassified_status("ReplyTypeMismatch"))
                }
            },
            Err(fault) => Err(fault.into_status()),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Appends a stage. Stages run in the order they are added.
    pub fn stage(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            middleware: self.middleware.into(),
        }
    }
}
