//! HTTP plumbing shared by the provisioning, MCP and chat clients.

mod client;
mod sse;

pub use client::{HttpClient, HttpError};
pub use sse::{SseEvent, SseParser};

use std::time::Duration;

/// Default timeout for HTTP requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout for HTTP requests.
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client with standard timeouts.
#[must_use]
pub fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
