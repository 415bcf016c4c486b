//! Prometheus metrics for the item store.
//!
//! [`Metrics`] owns its own recorder instead of installing a global one, so
//! a single instance can be created at startup and shared by reference with
//! every component that reports telemetry. Tests create independent
//! instances and inspect the rendered output.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `itemstore_requests_total` | Counter | `method`, `status` |
//! | `itemstore_request_duration_seconds` | Histogram | `method`, `status` |
//! | `itemstore_errors_total` | Counter | `method`, `error_type` |
//! | `itemstore_entities_created_total` | Counter | - |
//! | `itemstore_entities_updated_total` | Counter | - |
//! | `itemstore_entities_deleted_total` | Counter | - |
//! | `itemstore_active_connections` | Gauge | - |
//! | `itemstore_database_operation_duration_seconds` | Histogram | `operation` |
//! | `itemstore_validation_errors_total` | Counter | `method` |
//! | `itemstore_authorization_failures_total` | Counter | `operation`, `reason` |

use itemstore_core::types::Operation;
use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    with_local_recorder,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusRecorder};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tonic::Code;

pub const REQUESTS_TOTAL: &str = "itemstore_requests_total";
pub const REQUEST_DURATION: &str = "itemstore_request_duration_seconds";
pub const ERRORS_TOTAL: &str = "itemstore_errors_total";
pub const ENTITIES_CREATED: &str = "itemstore_entities_created_total";
pub const ENTITIES_UPDATED: &str = "itemstore_entities_updated_total";
pub const ENTITIES_DELETED: &str = "itemstore_entities_deleted_total";
pub const ACTIVE_CONNECTIONS: &str = "itemstore_active_connections";
pub const DATABASE_DURATION: &str = "itemstore_database_operation_duration_seconds";
pub const VALIDATION_ERRORS: &str = "itemstore_validation_errors_total";
pub const AUTHORIZATION_FAILURES: &str = "itemstore_authorization_failures_total";

/// Status label recorded for calls that returned `Ok`.
pub const SUCCESS: &str = "success";

// 1ms .. 10s
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub struct Metrics {
    recorder: PrometheusRecorder,
    active: AtomicI64,
}

impl Metrics {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_owned()),
                DURATION_BUCKETS,
            )?
            .build_recorder();

        let metrics = Self {
            recorder,
            active: AtomicI64::new(0),
        };
        metrics.describe();
        Ok(metrics)
    }

    fn describe(&self) {
        with_local_recorder(&self.recorder, || {
            describe_counter!(REQUESTS_TOTAL, "Total gRPC calls by method and outcome");
            describe_histogram!(
                REQUEST_DURATION,
                Unit::Seconds,
                "End-to-end gRPC call duration"
            );
            describe_counter!(ERRORS_TOTAL, "Failed gRPC calls by method and status");
            describe_counter!(ENTITIES_CREATED, "Items created");
            describe_counter!(ENTITIES_UPDATED, "Items updated");
            describe_counter!(ENTITIES_DELETED, "Items deleted");
            describe_gauge!(ACTIVE_CONNECTIONS, "Calls currently in flight");
            describe_histogram!(
                DATABASE_DURATION,
                Unit::Seconds,
                "Storage round-trip duration by operation"
            );
            describe_counter!(VALIDATION_ERRORS, "Calls rejected by request validation");
            describe_counter!(
                AUTHORIZATION_FAILURES,
                "Calls rejected by authorization by operation and reason"
            );
        });
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.recorder.handle().render()
    }

    /// Marks a call as in flight until the returned guard is dropped.
    pub fn track_active(&self) -> ActiveCall<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        with_local_recorder(&self.recorder, || gauge!(ACTIVE_CONNECTIONS).increment(1.0));
        ActiveCall { metrics: self }
    }

    /// Number of calls currently in flight.
    pub fn active_calls(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn record_request(&self, method: &str, status: &str, duration: Duration) {
        with_local_recorder(&self.recorder, || {
            counter!(
                REQUESTS_TOTAL,
                "method" => method.to_owned(),
                "status" => status.to_owned()
            )
            .increment(1);
            histogram!(
                REQUEST_DURATION,
                "method" => method.to_owned(),
                "status" => status.to_owned()
            )
            .record(duration.as_secs_f64());
        });
    }

    pub fn record_error(&self, method: &str, error_type: &str) {
        with_local_recorder(&self.recorder, || {
            counter!(
                ERRORS_TOTAL,
                "method" => method.to_owned(),
                "error_type" => error_type.to_owned()
            )
            .increment(1);
        });
    }

    /// Counts a successful mutation. Reads are not counted.
    pub fn record_entity_change(&self, operation: Operation) {
        let name = match operation {
            Operation::Create => ENTITIES_CREATED,
            Operation::Update => ENTITIES_UPDATED,
            Operation::Delete => ENTITIES_DELETED,
            Operation::Read => return,
        };
        with_local_recorder(&self.recorder, || counter!(name).increment(1));
    }

    pub fn record_database_operation(&self, operation: Operation, duration: Duration) {
        with_local_recorder(&self.recorder, || {
            histogram!(DATABASE_DURATION, "operation" => operation.as_str())
                .record(duration.as_secs_f64());
        });
    }

    pub fn record_validation_error(&self, method: &str) {
        with_local_recorder(&self.recorder, || {
            counter!(VALIDATION_ERRORS, "method" => method.to_owned()).increment(1);
        });
    }

    pub fn record_authorization_failure(&self, operation: Operation, reason: &str) {
        with_local_recorder(&self.recorder, || {
            counter!(
                AUTHORIZATION_FAILURES,
                "operation" => operation.as_str(),
                "reason" => reason.to_owned()
            )
            .increment(1);
        });
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("active", &self.active_calls())
            .finish_non_exhaustive()
    }
}

/// In-flight marker returned by [`Metrics::track_active`].
#[must_use = "the call stops being tracked as soon as the guard is dropped"]
pub struct ActiveCall<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::AcqRel);
        with_local_recorder(&self.metrics.recorder, || {
            gauge!(ACTIVE_CONNECTIONS).decrement(1.0);
        });
    }
}

/// Snake-case label for a gRPC status code, e.g. `invalid_argument`.
pub const fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "cancelled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}
