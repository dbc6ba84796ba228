//! HTTP retry for rate-limited and failing Earth Engine calls.
//!
//! Every request to the service goes through [`send_json`]. HTTP 429 and
//! 5xx responses are retried with exponential backoff (2s, 4s, 8s, ... with
//! the default one second base delay).
//! Timeouts, connection errors and other 4xx responses fail immediately so
//! a stuck or misconfigured service surfaces on the first attempt.

use std::time::Duration;

use crate::EarthEngineError;

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 500;

/// Upper bound on [`RetryPolicy::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// How often and how patiently to retry a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt for HTTP 429 and 5xx responses.
    pub max_retries: u32,
    /// Delay before the first retry is `2 * base_delay`, doubling after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(MAX_RETRIES)))
    }
}

/// Sends the request built by `build_request` and parses the body as JSON.
///
/// `build_request` is called once per attempt since a
/// [`reqwest::RequestBuilder`] is consumed by `send()`.
///
/// # Errors
///
/// Returns [`EarthEngineError::Http`] if the request cannot be sent,
/// [`EarthEngineError::Api`] if the service answers with a non-success
/// status (after retries for 429/5xx), or [`EarthEngineError::Json`] if the
/// body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(
    build_request: F,
    policy: RetryPolicy,
) -> Result<serde_json::Value, EarthEngineError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        let response = build_request().send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| {
                log::error!(
                    "Earth Engine returned invalid JSON\n  \
                     url: {url}\n  \
                     parse error: {e}\n  \
                     body preview: {}",
                    preview(&text)
                );
                EarthEngineError::Json(e)
            });
        }

        let retryable =
            status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        if retryable && attempt < policy.max_retries {
            attempt += 1;
            let delay = policy.delay(attempt);
            log::warn!(
                "Earth Engine HTTP {status} (retry {attempt}/{} in {delay:?})\n  \
                 url: {url}",
                policy.max_retries
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err(EarthEngineError::Api {
            status: status.as_u16(),
            message: api_error_message(&text),
        });
    }
}

/// Extracts `error.message` from an Earth Engine error body, falling back
/// to a preview of the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| preview(body))
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let end = (0..=BODY_PREVIEW_LEN)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
