//! Outermost stage: counts, times and classifies every call.

use super::{BoxFuture, CallResult, Middleware, Next};
use crate::server::context::CallContext;
use crate::server::metrics::{Metrics, SUCCESS, code_label};
use std::sync::Arc;
use std::time::Instant;
use tonic::Code;

pub struct MetricsMiddleware {
    metrics: Arc<Metrics>,
}

impl MetricsMiddleware {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let _active = self.metrics.track_active();
            let started = Instant::now();

            let result = next.run(ctx).await;

            let elapsed = started.elapsed();
            let method = ctx.method_name();
            match &result {
                Ok(_) => {
                    self.metrics.record_request(method, SUCCESS, elapsed);
                    self.metrics.record_entity_change(ctx.operation());
                }
                Err(fault) => {
                    let code = fault.code();
                    let label = code_label(code);
                    self.metrics.record_request(method, label, elapsed);
                    self.metrics.record_error(method, label);
                    match code {
                        Code::InvalidArgument => self.metrics.record_validation_error(method),
                        Code::Unauthenticated | Code::PermissionDenied => self
                            .metrics
                            .record_authorization_failure(ctx.operation(), label),
                        _ => {}
                    }
                }
            }
            result
        })
    }
}
