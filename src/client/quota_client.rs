//! Quota-aware HTTP client.
//!
//! Wraps `reqwest::Client` with three behaviors the simulation platform
//! requires:
//!
//! - local rate-limit windows per api name, learned from `RateLimit-*` headers
//!   and enforced before every attempt
//! - retries with exponential backoff (`backoff_factor * 2^attempt` seconds) on
//!   timeouts, connection failures and retryable status codes
//! - surfacing the server's `Retry-After` hint alongside the result

use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::rate_limit::{parse_retry_after, RateLimitTable, RateLimitWindow};
use crate::error::{ClientError, ErrorClass};
use crate::metrics::MetricsCollector;

/// Default platform endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.worldquantbrain.com";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum characters of a non-JSON error body that get logged.
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Configuration for [`QuotaAwareClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub retryable_status_codes: Vec<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            backoff_factor: 1.5,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            username: None,
            password: None,
            user_agent: format!("alpha-forge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.retryable_status_codes = codes;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Returns true when both username and password are set.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// A single logical API call.
///
/// `api_name` is the rate-limit bucket the call counts against. The optional
/// overrides replace the client-wide retry settings for this call only.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub api_name: String,
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub basic_auth: bool,
    pub retryable_status_codes: Option<Vec<u16>>,
    pub max_retries: Option<u32>,
    pub backoff_factor: Option<f64>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            api_name: api_name.into(),
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            basic_auth: false,
            retryable_status_codes: None,
            max_retries: None,
            backoff_factor: None,
        }
    }

    pub fn get(path: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self::new(Method::GET, path, api_name)
    }

    pub fn post(path: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self::new(Method::POST, path, api_name)
    }

    pub fn delete(path: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, api_name)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends the configured credentials as HTTP basic auth.
    pub fn with_basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.retryable_status_codes = Some(codes);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }
}

/// Undecoded response of a successful call.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Value of a header as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Result of a call together with the server's `Retry-After` hint in seconds.
#[derive(Debug, Clone)]
pub struct RequestOutcome<T> {
    pub result: T,
    pub retry_after: Option<f64>,
}

/// HTTP client enforcing local rate-limit windows and retrying transient failures.
pub struct QuotaAwareClient {
    http: RwLock<Option<reqwest::Client>>,
    config: ClientConfig,
    rate_limits: RateLimitTable,
    metrics: MetricsCollector,
}

impl QuotaAwareClient {
    /// Creates a client. The cookie store is enabled so that a session
    /// established by `/authentication` is reused by later calls.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http: RwLock::new(Some(http)),
            config,
            rate_limits: RateLimitTable::new(),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the rate-limit window tracked for `api_name`.
    pub fn rate_limit(&self, api_name: &str) -> Option<RateLimitWindow> {
        self.rate_limits.get(api_name)
    }

    /// Closes the client. Subsequent requests fail with `ClientError::Closed`.
    pub fn close(&self) {
        let mut http = match self.http.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if http.take().is_some() {
            debug!(base_url = %self.config.base_url, "Closed HTTP client");
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.http.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Executes `req` and decodes a JSON body into `T`.
    ///
    /// The result is `None` for 204/205 responses and empty bodies.
    ///
    /// # Errors
    ///
    /// Everything [`QuotaAwareClient::request_raw`] returns, plus
    /// `ClientError::Decode` when a 2xx body is not valid `T`. Decode failures
    /// are never retried.
    pub async fn request<T: DeserializeOwned>(
        &self,
        req: &ApiRequest,
    ) -> Result<RequestOutcome<Option<T>>, ClientError> {
        let outcome = self.request_raw(req).await?;
        let response = outcome.result;

        let no_body = matches!(
            response.status,
            StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT
        ) || response.body.trim().is_empty();

        let result = if no_body {
            None
        } else {
            Some(response.json::<T>()?)
        };

        Ok(RequestOutcome {
            result,
            retry_after: outcome.retry_after,
        })
    }

    /// Executes `req` and returns the raw 2xx response.
    ///
    /// # Errors
    ///
    /// - `ClientError::MissingApiName` if `req.api_name` is empty
    /// - `ClientError::Closed` after [`QuotaAwareClient::close`]
    /// - `ClientError::HttpStatus` for non-2xx responses, after the retry
    ///   budget is spent when the status is retryable
    /// - `ClientError::Timeout` / `ClientError::Network` once retries are exhausted
    pub async fn request_raw(
        &self,
        req: &ApiRequest,
    ) -> Result<RequestOutcome<RawResponse>, ClientError> {
        if req.api_name.trim().is_empty() {
            return Err(ClientError::MissingApiName);
        }

        let http = self.http()?;
        let url = self.build_url(req)?;
        let max_retries = req.max_retries.unwrap_or(self.config.max_retries);
        let backoff_factor = req.backoff_factor.unwrap_or(self.config.backoff_factor);
        let retryable = req
            .retryable_status_codes
            .as_deref()
            .unwrap_or(&self.config.retryable_status_codes);

        let mut attempt: u32 = 0;
        loop {
            self.rate_limits.acquire(&req.api_name, &self.metrics).await;

            let err = match self.attempt(&http, req, &url, retryable).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            if !is_retryable(&err, retryable) {
                return Err(err);
            }

            if attempt >= max_retries {
                warn!(
                    api_name = %req.api_name,
                    attempts = attempt + 1,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            let delay = backoff_delay(backoff_factor, attempt);
            warn!(
                api_name = %req.api_name,
                attempt = attempt + 1,
                max_retries = max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            self.metrics.record_retry(&req.api_name);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One send, with rate-limit bookkeeping and status classification.
    async fn attempt(
        &self,
        http: &reqwest::Client,
        req: &ApiRequest,
        url: &Url,
        retryable: &[u16],
    ) -> Result<RequestOutcome<RawResponse>, ClientError> {
        let started = Instant::now();
        debug!(api_name = %req.api_name, method = %req.method, url = %url, "Sending request");

        let response = match self.builder(http, req, url).send().await {
            Ok(response) => response,
            Err(e) => {
                let err = ClientError::from_reqwest(e);
                self.metrics.record_http_request(
                    &req.api_name,
                    &err.class().to_string(),
                    started.elapsed().as_secs_f64(),
                );
                return Err(err);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        self.rate_limits.update(&req.api_name, &headers);
        let retry_after = parse_retry_after(&headers);

        let body = response.text().await.map_err(ClientError::from_reqwest)?;
        self.metrics.record_http_request(
            &req.api_name,
            status.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if status.is_success() {
            debug!(api_name = %req.api_name, status = %status, retry_after = ?retry_after, "Request succeeded");
            return Ok(RequestOutcome {
                result: RawResponse {
                    status,
                    headers,
                    body,
                },
                retry_after,
            });
        }

        if !retryable.contains(&status.as_u16()) {
            log_error_response(req, url, status, &headers, &body);
        }

        Err(ClientError::HttpStatus {
            status: status.as_u16(),
            body: preview(&body),
        })
    }

    fn builder(&self, http: &reqwest::Client, req: &ApiRequest, url: &Url) -> reqwest::RequestBuilder {
        let mut builder = http.request(req.method.clone(), url.clone());

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        if req.basic_auth {
            if let Some(username) = &self.config.username {
                builder = builder.basic_auth(username, self.config.password.as_ref());
            }
        }

        builder
    }

    fn build_url(&self, req: &ApiRequest) -> Result<Url, ClientError> {
        let raw = if req.path.starts_with("http://") || req.path.starts_with("https://") {
            req.path.clone()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                req.path.trim_start_matches('/')
            )
        };

        let parsed = if req.params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, &req.params)
        };

        parsed.map_err(|e| ClientError::InvalidRequest(format!("{}: {}", raw, e)))
    }

    fn http(&self) -> Result<reqwest::Client, ClientError> {
        let guard = match self.http.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(ClientError::Closed)
    }
}

fn is_retryable(err: &ClientError, retryable: &[u16]) -> bool {
    match err {
        ClientError::HttpStatus { status, .. } => retryable.contains(status),
        other => other.class() == ErrorClass::Transient,
    }
}

fn backoff_delay(backoff_factor: f64, attempt: u32) -> Duration {
    let secs = backoff_factor * 2f64.powi(attempt.min(30) as i32);
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

fn preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}

fn log_error_response(
    req: &ApiRequest,
    url: &Url,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);

    if is_json {
        if let Ok(detail) = serde_json::from_str::<serde_json::Value>(body) {
            error!(
                api_name = %req.api_name,
                method = %req.method,
                url = %url,
                status = status.as_u16(),
                detail = %detail,
                "Request failed"
            );
            return;
        }
    }

    error!(
        api_name = %req.api_name,
        method = %req.method,
        url = %url,
        status = status.as_u16(),
        body = %preview(body),
        "Request failed"
    );
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::rate_limit::MAX_SERVER_HINT;

    fn client_for(server: &MockServer) -> QuotaAwareClient {
        QuotaAwareClient::new(
            ClientConfig::new(server.uri())
                .with_max_retries(2)
                .with_backoff_factor(0.01),
        )
        .unwrap()
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retryable_status_codes, vec![429, 500, 502, 503, 504]);
        assert!(!config.has_credentials());
        assert!(config.with_credentials("user", "pw").has_credentials());
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(1.5, 0), Duration::from_millis(1500));
        assert_eq!(backoff_delay(1.5, 1), Duration::from_secs(3));
        assert_eq!(backoff_delay(1.5, 2), Duration::from_secs(6));
        assert_eq!(backoff_delay(-1.0, 2), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_decodes_json_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alphas/abc"))
            .and(query_param("limit", "5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "2.5")
                    .set_body_json(json!({"id": "abc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let req = ApiRequest::get("alphas/abc", "alphas.get").with_param("limit", "5");
        let outcome = client
            .request::<serde_json::Value>(&req)
            .await
            .expect("request");

        assert_eq!(outcome.result.unwrap()["id"], "abc");
        assert_eq!(outcome.retry_after, Some(2.5));
    }

    #[tokio::test]
    async fn test_oversized_server_hints_are_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("RateLimit-Limit", "10")
                    .insert_header("RateLimit-Remaining", "5")
                    .insert_header("RateLimit-Reset", "1e20")
                    .insert_header("Retry-After", "1e20"),
            )
            .mount(&server)
            .await;

        let client = Arc::new(client_for(&server));
        let task_client = Arc::clone(&client);
        let outcome = tokio::spawn(async move {
            task_client
                .request_raw(&ApiRequest::get("alphas", "alphas.list"))
                .await
        })
        .await
        .expect("request task does not panic")
        .expect("request");

        assert_eq!(outcome.retry_after, Some(MAX_SERVER_HINT.as_secs_f64()));
        let window = client.rate_limit("alphas.list").unwrap();
        assert_eq!(window.reset, MAX_SERVER_HINT);
        assert_eq!(window.remaining, 5);
    }

    #[tokio::test]
    async fn test_no_content_skips_decoding() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .request::<serde_json::Value>(&ApiRequest::delete("simulations/x", "simulations.delete"))
            .await
            .expect("request");
        assert!(outcome.result.is_none());
        assert!(outcome.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_retryable_status_makes_max_retries_plus_one_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .request_raw(&ApiRequest::post("simulations", "simulations.create"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"ok": true}))
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .request::<serde_json::Value>(&ApiRequest::get("operators", "operators"))
            .await
            .expect("request");
        assert_eq!(outcome.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"detail": "bad settings"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .request_raw(&ApiRequest::post("simulations", "simulations.create"))
            .await
            .unwrap_err();

        match err {
            ClientError::HttpStatus { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("bad settings"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_per_call_retry_overrides() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(409))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let req = ApiRequest::get("alphas", "alphas.list")
            .with_retryable_status_codes(vec![409])
            .with_max_retries(1)
            .with_backoff_factor(0.0);
        let err = client.request_raw(&req).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn test_decode_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .request::<serde_json::Value>(&ApiRequest::get("alphas", "alphas.list"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_api_name_and_closed_client() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let err = client
            .request_raw(&ApiRequest::get("alphas", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingApiName));

        client.close();
        assert!(client.is_closed());
        let err = client
            .request_raw(&ApiRequest::get("alphas", "alphas.list"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_window_delays_next_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("RateLimit-Limit", "1")
                    .insert_header("RateLimit-Remaining", "0")
                    .insert_header("RateLimit-Reset", "1"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let req = ApiRequest::get("simulations/p1", "simulations.progress");

        client.request_raw(&req).await.expect("first");
        let window = client.rate_limit("simulations.progress").unwrap();
        assert_eq!(window.remaining, 0);
        assert!(window.remaining <= window.limit);

        let started = Instant::now();
        client.request_raw(&req).await.expect("second");
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_retries_on_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = QuotaAwareClient::new(
            ClientConfig::new(format!("http://{}", addr))
                .with_max_retries(1)
                .with_backoff_factor(0.005),
        )
        .unwrap();

        let err = client
            .request_raw(&ApiRequest::get("alphas", "alphas.list"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_failed_send_is_labeled_with_error_class() {
        let _ = crate::metrics::init_metrics();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            QuotaAwareClient::new(ClientConfig::new(format!("http://{}", addr)).with_max_retries(0))
                .unwrap();
        client
            .request_raw(&ApiRequest::get("alphas", "alphas.unreachable"))
            .await
            .unwrap_err();

        let requests = crate::metrics::HTTP_REQUESTS_TOTAL.get().unwrap();
        assert_eq!(
            requests
                .with_label_values(&["alphas.unreachable", "transient"])
                .get(),
            1.0
        );
        assert_eq!(
            requests
                .with_label_values(&["alphas.unreachable", "error"])
                .get(),
            0.0
        );
    }
}
