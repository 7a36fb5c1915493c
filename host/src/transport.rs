//! Executes `HttpRequest` values built by the core client.
//!
//! `HttpTransport` sends them with reqwest. `Retrying` wraps any transport
//! and repeats failed reads; writes are never repeated because the server
//! may already have applied them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use taskboard_core::{ApiError, HttpMethod, HttpRequest, HttpResponse};
use tracing::warn;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Any status code is a response; only failing to get one is an error.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.path);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| ApiError::Network(err.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|err| ApiError::Network(err.to_string()))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await.map_err(network)?;
        Ok(HttpResponse { status, headers, body })
    }
}

fn network(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Network(format!("request timed out: {err}"))
    } else {
        ApiError::Network(err.to_string())
    }
}

/// Repeats a `GET` up to `retries` more times on a network error or a
/// 5xx response.
#[derive(Debug, Clone)]
pub struct Retrying<T> {
    inner: T,
    retries: u32,
}

impl<T: Transport> Retrying<T> {
    pub fn new(inner: T, retries: u32) -> Self {
        Self { inner, retries }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn should_retry(result: &Result<HttpResponse, ApiError>) -> bool {
    match result {
        Ok(response) => response.status >= 500,
        Err(err) => err.is_retryable(),
    }
}

#[async_trait]
impl<T: Transport> Transport for Retrying<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        if request.method != HttpMethod::Get {
            return self.inner.execute(request).await;
        }
        let mut attempt = 0;
        loop {
            let result = self.inner.execute(request.clone()).await;
            if attempt >= self.retries || !should_retry(&result) {
                return result;
            }
            attempt += 1;
            warn!(path = %request.path, attempt, "retrying read");
        }
    }
}
