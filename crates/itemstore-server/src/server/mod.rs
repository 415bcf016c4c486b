//! Server-side building blocks for the item store.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment configuration.
//! - [`telemetry`] - logging subscriber and optional OpenTelemetry export.
//! - [`metrics`] - the injected Prometheus metrics collector.
//! - [`context`] - per-call context threaded through the pipeline.
//! - [`auth`] - bearer token validation and operation-based authorization.
//! - [`pipeline`] - the middleware chain wrapped around every call.
//! - [`service`] - the item service and its gRPC transport adapter.
//! - [`storage`] - repository contract plus PostgreSQL and in-memory backends.
//! - [`health`] - liveness/readiness checks and the HTTP side server.

pub mod auth;
pub mod config;
pub mod context;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod telemetry;
