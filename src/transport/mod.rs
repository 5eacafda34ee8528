//!
//! HTTP transport boundary for the ledger service.
//!
//! A roundtrip is exactly one request/response exchange returning the parsed
//! JSON body. Non-2xx statuses and malformed bodies surface as errors and are
//! never retried here; the caller's scheduling loop owns retry policy. The
//! per-request timeout is the sole abort mechanism for an in-flight exchange.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout applied to every exchange unless the request overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One request to the ledger service.
#[derive(Debug, Clone)]
pub struct Request {
	pub method: Method,
	pub path: String,
	pub payload: Option<Value>,
	pub headers: Vec<(String, String)>,
	pub timeout: Option<Duration>,
}

impl Request {
	pub fn get(path: impl Into<String>) -> Self {
		Self {
			method: Method::GET,
			path: path.into(),
			payload: None,
			headers: Vec::new(),
			timeout: None,
		}
	}

	pub fn post(path: impl Into<String>, payload: Value) -> Self {
		Self {
			method: Method::POST,
			path: path.into(),
			payload: Some(payload),
			headers: Vec::new(),
			timeout: None,
		}
	}

	pub fn put(path: impl Into<String>, payload: Value) -> Self {
		Self {
			method: Method::PUT,
			path: path.into(),
			payload: Some(payload),
			headers: Vec::new(),
			timeout: None,
		}
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}
}

/// Error types for ledger exchanges
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	#[error("HTTP response {status}")]
	Status { status: StatusCode, body: String },

	#[error("request timed out")]
	Timeout,

	#[error("request error: {0}")]
	Request(reqwest::Error),

	#[error("malformed response body: {0}")]
	Body(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TransportError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			TransportError::Timeout
		} else {
			TransportError::Request(err)
		}
	}
}

/// Performs one request/response exchange against the ledger service.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn roundtrip(&self, request: Request) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
	async fn roundtrip(&self, request: Request) -> Result<Value, TransportError> {
		(**self).roundtrip(request).await
	}
}

/// Ledger service transport over HTTP(S).
#[derive(Clone)]
pub struct HttpTransport {
	/// The underlying HTTP client.
	http_client: reqwest::Client,
	/// Base URL of the ledger service.
	base_url: String,
}

impl HttpTransport {
	/// Create a transport rooted at `base_url` with the default timeout.
	pub fn new(base_url: impl Into<String>) -> Self {
		let http_client = reqwest::Client::builder()
			.timeout(DEFAULT_TIMEOUT)
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http_client,
			base_url: base_url.into(),
		}
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn roundtrip(&self, request: Request) -> Result<Value, TransportError> {
		let url = format!("{}{}", self.base_url.trim_end_matches('/'), request.path);
		debug!(method = %request.method, path = %request.path, "roundtrip");

		let mut builder = self.http_client.request(request.method.clone(), &url);
		if let Some(timeout) = request.timeout {
			builder = builder.timeout(timeout);
		}
		for (name, value) in &request.headers {
			builder = builder.header(name, value);
		}
		if let Some(payload) = &request.payload {
			builder = builder.json(payload);
		}

		let response = builder.send().await?;
		let status = response.status();
		let body = response.text().await?;

		if !status.is_success() {
			warn!(%status, path = %request.path, "ledger returned non-success status");
			return Err(TransportError::Status { status, body });
		}
		if status == StatusCode::NO_CONTENT || body.is_empty() {
			return Ok(Value::Null);
		}

		Ok(serde_json::from_str(&body)?)
	}
}
