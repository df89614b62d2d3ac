//! Network utilities for CMS HTTP traffic.
//!
//! This module provides:
//! - Retry logic with exponential backoff
//! - A resilient client with per-attempt timeouts and pluggable transport
//! - Background health monitoring of service endpoints

mod client;
mod health;
mod retry;

pub use client::{
    Auth, HttpRequest, HttpResponse, Method, MultipartFile, ReqwestTransport, RequestBody,
    ResilientClient, Transport,
};
pub use health::{
    EndpointHealth, HealthListener, HealthMonitor, HealthReport, HealthStatus, HealthSummary,
    ServiceEndpoint,
};
pub use retry::{retry_async, RetryPolicy, RetryPredicate, RetryStats};

#[cfg(test)]
pub(crate) use client::testing;
