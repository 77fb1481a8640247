use crate::auth::TokenCache;
use crate::errors::{error_detail, is_schema_rejection, NpmError, ValidationOrigin};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// How often a request is attempted when the connection cannot be established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling with every failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Model for the NPM client object
#[derive(Debug)]
pub struct NpmClient {
    pub base_url: String,
    pub http: reqwest::Client,
    pub tokens: TokenCache,
    pub retry: RetryPolicy,
}

impl NpmClient {
    /// Creates a client for the NPM instance at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Admin API root, e.g. `http://127.0.0.1:81`
    /// * `tokens` - Cache the bearer token is read from and written to
    /// * `timeout` - Upper bound for a whole request
    pub fn new(base_url: &str, tokens: TokenCache, timeout: Duration) -> Result<Self, NpmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()
            .map_err(|e| NpmError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(NpmClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            tokens,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request built by `build`, retrying only when no connection could be made.
    ///
    /// Once a response arrives, whatever its status, it is returned as is.
    pub async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, NpmError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Cannot connect to {} (attempt {}/{}), retrying in {:?}",
                        url, attempt, attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_connect() => {
                    return Err(NpmError::Connection {
                        url: url.to_string(),
                        source: e,
                    })
                }
                Err(e) => {
                    return Err(NpmError::Transport {
                        url: url.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Maps a response onto its body or the matching error.
    ///
    /// # Arguments
    ///
    /// * `response` - Response to inspect
    /// * `action` - What the request does, e.g. `update proxy host 7`
    /// * `subject` - What a 404 refers to, e.g. `Proxy host 7`
    pub async fn check_response(
        &self,
        response: Response,
        action: &str,
        subject: &str,
    ) -> Result<String, NpmError> {
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| NpmError::Transport { url, source: e })?;
        debug!("{} -> HTTP {}", action, status);

        if status.is_success() {
            return Ok(body);
        }
        let detail = error_detail(&body);
        match status {
            StatusCode::UNAUTHORIZED => {
                if let Err(e) = self.tokens.clear() {
                    warn!("Cannot remove rejected token: {}", e);
                }
                Err(NpmError::Authentication(format!(
                    "request to {} was rejected, the token is invalid or expired{}",
                    action,
                    detail.map(|d| format!(" ({})", d)).unwrap_or_default()
                )))
            }
            StatusCode::NOT_FOUND => Err(NpmError::NotFound(subject.to_string())),
            StatusCode::BAD_REQUEST if detail.as_deref().map_or(false, is_schema_rejection) => {
                Err(NpmError::Validation {
                    origin: ValidationOrigin::Rejected,
                    message: action.to_string(),
                    detail,
                })
            }
            _ => Err(NpmError::Api {
                context: action.to_string(),
                status,
                detail,
            }),
        }
    }

    /// Performs an authenticated request and returns the body of a successful response.
    pub async fn execute<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        action: &str,
        subject: &str,
    ) -> Result<String, NpmError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let response = self.perform_request(method, path, body).await?;
        self.check_response(response, action, subject).await
    }
}

/// A generic HTTP interface that leverages `reqwest`.
#[async_trait]
pub trait NpmConnector {
    async fn perform_request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<Response, NpmError>
    where
        T: Serialize + Sync + ?Sized;
}

#[async_trait]
impl NpmConnector for NpmClient {
    /// Issues HTTP requests with the cached bearer token.
    ///
    /// # Arguments
    ///
    /// * `&self`
    /// * `method` - One of reqwest::Method (GET, POST, ...)
    /// * `path` - API path, appended to the base URL
    /// * `body` - Optional body to be sent as JSON
    async fn perform_request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<Response, NpmError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let token = self.tokens.load().ok_or_else(|| {
            NpmError::Authentication("no valid token cached, run `npm-cli login`".to_string())
        })?;
        let url = self.url(path);
        debug!("{} {}", method, url);

        self.send_with_retry(&url, || {
            let request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token);
            match body {
                Some(b) => request.json(b),
                None => request,
            }
        })
        .await
    }
}
