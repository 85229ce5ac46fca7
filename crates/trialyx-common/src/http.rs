//! Retrying HTTP client shared by all upstream source clients.
//!
//! Every request goes through the same policy: transient statuses
//! (408, 429, 503, 504) and connection-level failures are retried with
//! capped exponential backoff, honouring a server-supplied `Retry-After`
//! delay when present. Any other non-success status fails immediately,
//! as does a body that is not valid JSON when JSON was requested.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TrialyxError};

/// Statuses treated as transient and eligible for retry.
const RETRY_STATUSES: [u16; 4] = [408, 429, 503, 504];

/// Upstream error bodies are truncated to this length in error messages.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "trialyx/0.1 (clinical-data-pipeline)".to_string(),
            timeout_secs: 60,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Thin wrapper around `reqwest::Client` that owns the retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// GET a URL and parse the body as JSON.
    ///
    /// A non-JSON body on a success status is a malformed-payload error and
    /// is never retried.
    pub async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let resp = self.get_with_retry(url, params).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| TrialyxError::InvalidPayload {
            url: url.to_string(),
            detail: format!("{e}: {}", truncate(&text)),
        })
    }

    /// GET a URL and return the raw body text.
    pub async fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        let resp = self.get_with_retry(url, params).await?;
        Ok(resp.text().await?)
    }

    async fn get_with_retry(&self, url: &str, params: &[(&str, String)]) -> Result<Response> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let send_result = self.client.get(url).query(params).send().await;

            match send_result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if is_transient_status(status) {
                        if attempt >= self.config.max_attempts {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(TrialyxError::Api {
                                status,
                                url: url.to_string(),
                                body: truncate(&body),
                            });
                        }
                        let delay = retry_after(&resp).unwrap_or_else(|| self.delay_for(attempt));
                        warn!(url, status, attempt, delay_ms = delay.as_millis() as u64,
                              "transient upstream status, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if !resp.status().is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(TrialyxError::Api {
                            status,
                            url: url.to_string(),
                            body: truncate(&body),
                        });
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e.into());
                    }
                    let delay = self.delay_for(attempt);
                    debug!(url, attempt, error = %e, delay_ms = delay.as_millis() as u64,
                           "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.config.base_delay_ms, self.config.max_delay_ms)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(HttpConfig::default()).unwrap()
    }
}

/// Whether a status code is on the transient allow-list.
pub fn is_transient_status(status: u16) -> bool {
    RETRY_STATUSES.contains(&status)
}

/// Capped exponential backoff: `base * 2^(attempt-1)`, bounded by `max`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exp).min(max_ms);
    Duration::from_millis(delay)
}

fn retry_after(resp: &Response) -> Option<Duration> {
    let secs: f64 = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        for status in [408, 429, 503, 504] {
            assert!(is_transient_status(status));
        }
        for status in [200, 400, 404, 500] {
            assert!(!is_transient_status(status));
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, 500, 8_000), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, 500, 8_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(3, 500, 8_000), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(5, 500, 8_000), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(20, 500, 8_000), Duration::from_millis(8_000));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(600);
        let cut = truncate(&long);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
