//! HTTP fetcher implementation
//!
//! This module handles the single network call behind every fetch attempt:
//! - Building the HTTP client with a proper user agent string
//! - Streaming the body up to the fetch size cap
//! - Capturing the Retry-After header
//! - Classifying transport errors for the retry policy
//!
//! Retries, pacing and circuit breaking live in the orchestrator; a fetcher
//! makes exactly one attempt per call.

use crate::config::{FetchConfig, UserAgentConfig};
use crate::crawler::retry::ErrorClass;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

/// Response of a single fetch attempt, whatever its status
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Final URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status: u16,

    /// Body decoded as UTF-8 (lossy)
    pub body: String,

    /// Body bytes received
    pub bytes: u64,

    /// The body was cut off at the size cap
    pub truncated: bool,

    /// Raw Retry-After header value
    pub retry_after: Option<String>,

    /// Content-Type header value
    pub content_type: Option<String>,
}

/// A fetch attempt that produced no HTTP status
#[derive(Debug, Clone, Error)]
#[error("{class} error: {message}")]
pub struct FetchError {
    pub class: ErrorClass,
    pub message: String,
}

impl FetchError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// The network boundary of the orchestrator
///
/// Implementations make one attempt per call and never retry on their own.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawResponse, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - Crawler identification sent with every request
/// * `fetch` - Timeouts and redirect limit
///
/// # Example
///
/// ```no_run
/// use sumi_delve::config::{FetchConfig, UserAgentConfig};
/// use sumi_delve::crawler::build_http_client;
///
/// let user_agent = UserAgentConfig {
///     crawler_name: "SumiDelve".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&user_agent, &FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetch: &FetchConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(fetch.request_timeout_secs))
        .connect_timeout(Duration::from_secs(fetch.connect_timeout_secs))
        .redirect(Policy::limited(fetch.max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `reqwest`-backed fetcher used by the CLI
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, fetch: &FetchConfig) -> crate::Result<Self> {
        Ok(Self {
            client: build_http_client(user_agent, fetch)?,
            max_bytes: fetch.max_bytes_per_fetch,
        })
    }

    /// Wraps an existing client
    pub fn with_client(client: Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawResponse, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::new(classify_error(&e), describe_error(&e)))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let retry_after = header("retry-after");
        let content_type = header("content-type");

        let mut body = Vec::new();
        let mut truncated = false;
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| FetchError::new(classify_error(&e), describe_error(&e)))?;
            let Some(chunk) = chunk else {
                break;
            };
            let room = self.max_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                truncated = body.len() >= self.max_bytes;
                if truncated {
                    break;
                }
            } else {
                body.extend_from_slice(&chunk);
            }
        }

        if truncated {
            tracing::debug!("Body of {} truncated at {} bytes", url, self.max_bytes);
        }

        Ok(RawResponse {
            final_url,
            status,
            bytes: body.len() as u64,
            body: String::from_utf8_lossy(&body).into_owned(),
            truncated,
            retry_after,
            content_type,
        })
    }
}

/// Maps a reqwest error onto the retry policy's error classes
pub fn classify_error(error: &reqwest::Error) -> ErrorClass {
    let chain = describe_error(error).to_lowercase();

    if error.is_timeout() || chain.contains("timed out") {
        ErrorClass::Timeout
    } else if chain.contains("dns") || chain.contains("failed to lookup address") {
        ErrorClass::Dns
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake") {
        ErrorClass::Tls
    } else if chain.contains("reset") || chain.contains("broken pipe") || chain.contains("connection closed") {
        ErrorClass::ConnectionReset
    } else if error.is_connect() {
        ErrorClass::Connect
    } else if error.is_body() || error.is_decode() {
        ErrorClass::Body
    } else {
        ErrorClass::Other
    }
}

/// Flattens an error and its sources into one line
fn describe_error(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
