//! HTTP client with per-attempt timeouts and retry.
//!
//! [`ResilientClient`] is the single entry point every CMS call goes
//! through. The wire work itself sits behind the [`Transport`] trait so
//! tests can substitute scripted responses.

use crate::config::NetworkConfig;
use crate::network::retry::{retry_async, RetryPolicy};
use crate::{MigrateError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// HTTP methods used against CMS APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// Credentials attached to every request of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

/// A file part sent as multipart form data.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Bytes,
}

/// Request body. Kept as data so every retry rebuilds an identical request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartFile),
}

/// A fully described HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub auth: Auth,
    /// Overrides the client's per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            auth: Auth::None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn multipart(mut self, file: MultipartFile) -> Self {
        self.body = RequestBody::Multipart(file);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON, reporting shape mismatches as decode errors.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| MigrateError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Performs a single HTTP exchange with no retry or status interpretation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the full response, whatever its status.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// Stream a response body to `destination`, returning bytes written.
    ///
    /// Non-success statuses are reported as [`MigrateError::HttpStatus`].
    async fn download(&self, request: &HttpRequest, destination: &Path) -> Result<u64>;
}

/// [`Transport`] backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| MigrateError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;
        Ok(Self { client })
    }

    fn build(&self, request: &HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Bearer(token) => builder.bearer_auth(token),
        };

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(file) => {
                let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)
                    .map_err(|e| MigrateError::Other(format!("Invalid MIME type: {}", e)))?;
                builder.multipart(reqwest::multipart::Form::new().part(file.field.clone(), part))
            }
        };

        Ok(builder)
    }

    fn send_error(request: &HttpRequest, err: reqwest::Error) -> MigrateError {
        match MigrateError::from(err) {
            MigrateError::Network { message, cause } => MigrateError::Network {
                message: format!("{} {} failed: {}", request.method.as_str(), request.url, message),
                cause,
            },
            other => other,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| Self::send_error(request, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::send_error(request, e))?;

        Ok(HttpResponse {
            url,
            status,
            headers,
            body,
        })
    }

    async fn download(&self, request: &HttpRequest, destination: &Path) -> Result<u64> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| Self::send_error(request, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MigrateError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
                body: None,
            });
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| MigrateError::io_with_path(e, destination))?;

        let mut bytes_downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MigrateError::Network {
                message: format!("Error reading download stream: {}", e),
                cause: None,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| MigrateError::io_with_path(e, destination))?;
            bytes_downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| MigrateError::io_with_path(e, destination))?;

        Ok(bytes_downloaded)
    }
}

/// Authenticated HTTP client with per-attempt timeout and retry.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    auth: Auth,
    timeout: Duration,
    policy: RetryPolicy,
}

impl ResilientClient {
    /// Client over the reqwest transport with default timeout and policy.
    pub fn new(auth: Auth) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?), auth))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, auth: Auth) -> Self {
        Self {
            transport,
            auth,
            timeout: NetworkConfig::REQUEST_TIMEOUT,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request under the client's default policy.
    pub async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.call_with(request, &self.policy).await
    }

    /// Send a request under an explicit policy.
    ///
    /// Non-2xx responses become [`MigrateError::HttpStatus`]; whether they
    /// are retried is up to the policy.
    pub async fn call_with(&self, request: HttpRequest, policy: &RetryPolicy) -> Result<HttpResponse> {
        let request = self.authorize(request);
        let timeout = request.timeout.unwrap_or(self.timeout);

        let (result, stats) = retry_async(
            policy,
            || self.attempt(&request, timeout),
            |e| policy.should_retry(e),
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "{} {} finished after {} attempts (total delay: {:?})",
                request.method.as_str(),
                request.url,
                stats.attempts,
                stats.total_delay
            );
        }

        result
    }

    /// Stream a resource to disk under the client's policy and timeout.
    pub async fn download(&self, request: HttpRequest, destination: &Path) -> Result<u64> {
        let request = self.authorize(request);
        let timeout = request.timeout.unwrap_or(self.timeout);
        let policy = &self.policy;

        let (result, _) = retry_async(
            policy,
            || async {
                match tokio::time::timeout(timeout, self.transport.download(&request, destination))
                    .await
                {
                    Ok(Err(MigrateError::Timeout(_))) | Err(_) => Err(MigrateError::Timeout(timeout)),
                    Ok(result) => result,
                }
            },
            |e| policy.should_retry(e),
        )
        .await;

        result
    }

    fn authorize(&self, mut request: HttpRequest) -> HttpRequest {
        if request.auth == Auth::None {
            request.auth = self.auth.clone();
        }
        request
    }

    async fn attempt(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Err(MigrateError::Timeout(_))) | Err(_) => return Err(MigrateError::Timeout(timeout)),
            Ok(result) => result?,
        };

        if response.is_success() {
            Ok(response)
        } else {
            let body = response.text();
            Err(MigrateError::HttpStatus {
                status: response.status,
                url: request.url.clone(),
                body: (!body.is_empty()).then(|| body.chars().take(512).collect()),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays canned responses and records requests.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse>>>,
        fallback_status: Option<u16>,
        pub requests: Mutex<Vec<HttpRequest>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every request with this status once the script is empty.
        pub fn always(status: u16) -> Self {
            Self {
                fallback_status: Some(status),
                ..Self::default()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn push_status(&self, status: u16, body: &str) {
            self.responses.lock().unwrap().push_back(Ok(response(status, body)));
        }

        pub fn push_error(&self, err: MigrateError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    pub fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            url: "http://scripted".into(),
            status,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => Ok(response(self.fallback_status.unwrap_or(200), "")),
            }
        }

        async fn download(&self, request: &HttpRequest, destination: &Path) -> Result<u64> {
            let response = self.send(request).await?;
            if !response.is_success() {
                return Err(MigrateError::HttpStatus {
                    status: response.status,
                    url: request.url.clone(),
                    body: None,
                });
            }
            tokio::fs::write(destination, &response.body).await?;
            Ok(response.body.len() as u64)
        }
    }
}
