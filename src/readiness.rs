//! Post-OAuth readiness probe.
//!
//! A freshly authorized MCP server may take a few seconds to attach
//! credentials and start routing. The probe polls its health endpoint until a
//! request succeeds or the time budget runs out. Only success vs. failure of
//! the request matters; the response body is never inspected.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Default delay between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
/// Default overall budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const HEALTH_SEGMENT: &str = "health";

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("MCP server not ready after {waited:?} ({attempts} attempts): {url}")]
    Timeout {
        url: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("Readiness probe cancelled")]
    Cancelled,
}

/// Health endpoint for a server URL: `/health` appended to the path.
///
/// Unparseable input still gets a best-effort suffix.
#[must_use]
pub fn health_url(server_url: &str) -> String {
    match Url::parse(server_url) {
        Ok(mut url) => {
            let path = format!("{}/{HEALTH_SEGMENT}", url.path().trim_end_matches('/'));
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => format!("{}/{HEALTH_SEGMENT}", server_url.trim_end_matches('/')),
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    interval: Duration,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl ReadinessProber {
    pub fn new(interval: Duration) -> Self {
        Self {
            client: crate::http::create_http_client(),
            interval,
        }
    }

    /// Poll until the server answers, returning the number of attempts made.
    ///
    /// A zero `timeout` fails without sending any request.
    pub async fn wait_until_ready(
        &self,
        server_url: &str,
        timeout: Duration,
    ) -> Result<u32, ReadinessError> {
        let health = health_url(server_url);
        debug!(%health, "Health check URL");

        let start = Instant::now();
        let mut attempts = 0;

        while let Some(remaining) = timeout.checked_sub(start.elapsed()).filter(|d| !d.is_zero()) {
            attempts += 1;
            match self.check(&health, remaining).await {
                Ok(()) => {
                    debug!(%health, attempts, "MCP server ready");
                    return Ok(attempts);
                }
                Err(e) => debug!(%health, attempts, "MCP server not ready: {e}"),
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::time::sleep(self.interval.min(remaining)).await;
        }

        Err(ReadinessError::Timeout {
            url: health,
            attempts,
            waited: start.elapsed(),
        })
    }

    /// [`wait_until_ready`](Self::wait_until_ready), abandoned when `cancel` fires.
    pub async fn wait_until_ready_or_cancelled(
        &self,
        server_url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<u32, ReadinessError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ReadinessError::Cancelled),
            result = self.wait_until_ready(server_url, timeout) => result,
        }
    }

    async fn check(&self, url: &str, budget: Duration) -> Result<(), reqwest::Error> {
        self.client
            .get(url)
            .timeout(budget)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
