//! Periodic health probing of CMS service endpoints.
//!
//! [`HealthMonitor`] owns a background tick loop started and stopped by the
//! host process. Each tick probes all endpoints concurrently, aggregates an
//! overall status, and hands the report to registered listeners.

use crate::cms::CmsKind;
use crate::config::NetworkConfig;
use crate::network::client::{HttpRequest, Method, ResilientClient};
use crate::network::retry::RetryPolicy;
use crate::{MigrateError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One probed endpoint.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: String,
    pub method: Method,
    pub expected_status: Vec<u16>,
    pub timeout: Option<Duration>,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>, method: Method, expected: &[u16]) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method,
            expected_status: expected.to_vec(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Standard probe set for a CMS of the given kind.
    pub fn defaults_for(kind: CmsKind, base_url: &str) -> Vec<Self> {
        let base = base_url.trim_end_matches('/');
        let probe_timeout = NetworkConfig::HEALTH_PROBE_TIMEOUT;
        match kind {
            CmsKind::Strapi => vec![
                Self::new("strapi-health", format!("{base}/api/health"), Method::Get, &[200, 204])
                    .with_timeout(probe_timeout),
                Self::new("strapi-articles", format!("{base}/api/articles"), Method::Head, &[200, 404])
                    .with_timeout(probe_timeout),
            ],
            CmsKind::WordPress => vec![
                Self::new("wordpress-api", format!("{base}/wp-json"), Method::Get, &[200])
                    .with_timeout(probe_timeout),
                Self::new(
                    "wordpress-posts",
                    format!("{base}/wp-json/wp/v2/posts"),
                    Method::Head,
                    &[200, 404],
                )
                .with_timeout(probe_timeout),
            ],
        }
    }
}

/// Health classification for an endpoint or the whole set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub status: HealthStatus,
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Count of endpoints in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

/// Aggregated result of one check across all endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub endpoints: Vec<EndpointHealth>,
    pub summary: HealthSummary,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_endpoints(endpoints: Vec<EndpointHealth>) -> Self {
        let mut summary = HealthSummary {
            total: endpoints.len(),
            ..HealthSummary::default()
        };
        for endpoint in &endpoints {
            match endpoint.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
            }
        }

        let overall = endpoints
            .iter()
            .map(|e| e.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            overall,
            endpoints,
            summary,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }
}

/// Callback invoked with every completed report.
pub type HealthListener = Arc<dyn Fn(&HealthReport) -> Result<()> + Send + Sync>;

/// Background health monitor for a fixed set of endpoints.
pub struct HealthMonitor {
    client: ResilientClient,
    endpoints: Vec<ServiceEndpoint>,
    interval: Duration,
    policy: RetryPolicy,
    listeners: Mutex<Vec<HealthListener>>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_report: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(client: ResilientClient, endpoints: Vec<ServiceEndpoint>) -> Self {
        Self {
            client,
            endpoints,
            interval: NetworkConfig::HEALTH_CHECK_INTERVAL,
            policy: RetryPolicy::default().with_max_retries(NetworkConfig::HEALTH_PROBE_RETRIES),
            listeners: Mutex::new(Vec::new()),
            task: Mutex::new(None),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }

    /// Register a listener for completed reports.
    pub fn on_check(&self, listener: impl Fn(&HealthReport) -> Result<()> + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Most recent report, if any check has completed.
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().ok().and_then(|r| r.clone())
    }

    /// Start periodic checking. The first check runs immediately.
    ///
    /// Starting a running monitor restarts its timer.
    pub fn start(self: &Arc<Self>) {
        self.stop();

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    debug!("Health monitor dropped, ending loop");
                    break;
                };
                monitor.check_now().await;
            }
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        info!(
            "Health monitor started for {} endpoints (interval {:?})",
            self.endpoints.len(),
            interval
        );
    }

    /// Stop periodic checking. Safe to call repeatedly.
    pub fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Probe all endpoints once and notify listeners.
    pub async fn check_now(&self) -> HealthReport {
        let checks = self.endpoints.iter().map(|endpoint| self.probe(endpoint));
        let results = futures::future::join_all(checks).await;
        let report = HealthReport::from_endpoints(results);

        match report.overall {
            HealthStatus::Healthy => debug!("Health check: all {} endpoints healthy", report.summary.total),
            status => warn!(
                "Health check: {} ({} healthy, {} degraded, {} unhealthy)",
                status, report.summary.healthy, report.summary.degraded, report.summary.unhealthy
            ),
        }

        if let Ok(mut last) = self.last_report.write() {
            *last = Some(report.clone());
        }
        self.notify(&report);
        report
    }

    fn notify(&self, report: &HealthReport) {
        let listeners: Vec<HealthListener> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };

        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(report))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Health listener {} failed: {}", index, e),
                Err(_) => error!("Health listener {} panicked", index),
            }
        }
    }

    async fn probe(&self, endpoint: &ServiceEndpoint) -> EndpointHealth {
        let mut request = HttpRequest::new(endpoint.method, endpoint.url.clone());
        if let Some(timeout) = endpoint.timeout {
            request = request.timeout(timeout);
        }

        let started = Instant::now();
        let result = self.client.call_with(request, &self.policy).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let (status, http_status, error) = classify(endpoint, result.map(|r| r.status));

        EndpointHealth {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            status,
            http_status,
            response_time_ms,
            error,
            checked_at: Utc::now(),
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn classify(
    endpoint: &ServiceEndpoint,
    outcome: Result<u16>,
) -> (HealthStatus, Option<u16>, Option<String>) {
    match outcome {
        Ok(status) if endpoint.expected_status.contains(&status) => {
            (HealthStatus::Healthy, Some(status), None)
        }
        Ok(status) => (
            HealthStatus::Degraded,
            Some(status),
            Some(format!("Unexpected status {status}")),
        ),
        Err(MigrateError::HttpStatus { status, .. }) if endpoint.expected_status.contains(&status) => {
            (HealthStatus::Healthy, Some(status), None)
        }
        Err(MigrateError::HttpStatus { status, .. }) if status >= 500 => (
            HealthStatus::Unhealthy,
            Some(status),
            Some(format!("Server error {status}")),
        ),
        Err(MigrateError::HttpStatus { status, .. }) => (
            HealthStatus::Degraded,
            Some(status),
            Some(format!("Unexpected status {status}")),
        ),
        Err(e) => (HealthStatus::Unhealthy, None, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client::{Auth, HttpResponse, Transport};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers each URL with a fixed status; unknown URLs fail at transport level.
    struct StatusByUrl {
        statuses: HashMap<String, u16>,
        calls: AtomicUsize,
    }

    impl StatusByUrl {
        fn new(pairs: &[(&str, u16)]) -> Self {
            Self {
                statuses: pairs.iter().map(|(u, s)| (u.to_string(), *s)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for StatusByUrl {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.statuses.get(&request.url) {
                Some(status) => Ok(HttpResponse {
                    url: request.url.clone(),
                    status: *status,
                    headers: Vec::new(),
                    body: Bytes::new(),
                }),
                None => Err(MigrateError::Network {
                    message: "connection refused".into(),
                    cause: None,
                }),
            }
        }

        async fn download(&self, _request: &HttpRequest, _destination: &Path) -> Result<u64> {
            Ok(0)
        }
    }

    fn monitor(pairs: &[(&str, u16)], endpoints: Vec<ServiceEndpoint>) -> (Arc<StatusByUrl>, HealthMonitor) {
        let transport = Arc::new(StatusByUrl::new(pairs));
        let client = ResilientClient::with_transport(transport.clone(), Auth::None);
        let monitor = HealthMonitor::new(client, endpoints);
        (transport, monitor)
    }

    fn get(name: &str, url: &str, expected: &[u16]) -> ServiceEndpoint {
        ServiceEndpoint::new(name, url, Method::Get, expected)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_endpoint_makes_overall_unhealthy() {
        let (_, monitor) = monitor(
            &[("http://a/health", 503), ("http://b/health", 200)],
            vec![get("a", "http://a/health", &[200]), get("b", "http://b/health", &[200])],
        );

        let report = monitor.check_now().await;

        assert_eq!(report.overall, HealthStatus::Unhealthy);
        assert_eq!(report.summary.unhealthy, 1);
        assert_eq!(report.summary.healthy, 1);
        assert_eq!(report.endpoints[0].http_status, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_classification() {
        let (_, monitor) = monitor(
            &[
                ("http://cms/api/articles", 404),
                ("http://cms/api/health", 204),
                ("http://cms/other", 403),
            ],
            vec![
                ServiceEndpoint::new("articles", "http://cms/api/articles", Method::Head, &[200, 404]),
                get("health", "http://cms/api/health", &[200, 204]),
                get("other", "http://cms/other", &[200]),
                get("down", "http://cms/unreachable", &[200]),
            ],
        );

        let report = monitor.check_now().await;
        let statuses: Vec<HealthStatus> = report.endpoints.iter().map(|e| e.status).collect();

        assert_eq!(
            statuses,
            vec![
                HealthStatus::Healthy,
                HealthStatus::Healthy,
                HealthStatus::Degraded,
                HealthStatus::Unhealthy
            ]
        );
        assert_eq!(report.overall, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_degraded_when_no_endpoint_unhealthy() {
        let (_, monitor) = monitor(
            &[("http://a", 200), ("http://b", 401)],
            vec![get("a", "http://a", &[200]), get("b", "http://b", &[200])],
        );

        let report = monitor.check_now().await;
        assert_eq!(report.overall, HealthStatus::Degraded);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let (_, monitor) = monitor(&[("http://a", 200)], vec![get("a", "http://a", &[200])]);
        let seen = Arc::new(AtomicUsize::new(0));

        monitor.on_check(|_| panic!("listener bug"));
        monitor.on_check(|_| Err(MigrateError::Other("listener failed".into())));
        let seen_clone = seen.clone();
        monitor.on_check(move |report| {
            assert!(report.is_healthy());
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        monitor.check_now().await;
        monitor.check_now().await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(monitor.last_report().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_checks_immediately_and_stop_is_idempotent() {
        let (_, monitor) = monitor(&[("http://a", 200)], vec![get("a", "http://a", &[200])]);
        let monitor = Arc::new(monitor.with_interval(Duration::from_secs(30)));
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        monitor.on_check(move |_| {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_endpoints_per_cms() {
        let strapi = ServiceEndpoint::defaults_for(CmsKind::Strapi, "http://cms/");
        assert_eq!(strapi[0].url, "http://cms/api/health");
        assert_eq!(strapi[0].expected_status, vec![200, 204]);
        assert_eq!(strapi[1].method, Method::Head);

        let wp = ServiceEndpoint::defaults_for(CmsKind::WordPress, "http://blog");
        assert_eq!(wp[0].url, "http://blog/wp-json");
        assert_eq!(wp[1].url, "http://blog/wp-json/wp/v2/posts");
        assert_eq!(wp[1].expected_status, vec![200, 404]);
    }
}
