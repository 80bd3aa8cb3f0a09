//! Shared HTTP plumbing for provider clients.

use std::time::Duration;

use quarry_shared::{QuarryError, Result, truncate_chars};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("Quarry/", env!("CARGO_PKG_VERSION"));

/// Connect timeout for provider APIs.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest slice of an error body kept in a provider error.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Build a reqwest client bounded by `timeout`.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(timeout)
        .build()
        .map_err(|e| QuarryError::Network(format!("failed to build HTTP client: {e}")))
}

/// Send `request` and decode a JSON body, attributing failures to `provider`.
///
/// URLs are stripped from transport errors since some APIs carry the key in
/// the query string.
pub(crate) async fn send_json(provider: &str, request: RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| QuarryError::Network(format!("{provider}: {}", e.without_url())))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| QuarryError::Network(format!("{provider}: failed to read body: {}", e.without_url())))?;

    if !status.is_success() {
        return Err(QuarryError::provider(
            provider,
            format!("HTTP {status}: {}", truncate_chars(&body, MAX_ERROR_BODY_CHARS)),
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| QuarryError::provider(provider, format!("invalid JSON envelope: {e}")))
}

/// Pull a string out of a JSON envelope, or fail naming the missing path.
pub(crate) fn required_str<'a>(provider: &str, body: &'a Value, pointer: &str) -> Result<&'a str> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| QuarryError::provider(provider, format!("response missing {pointer}")))
}

/// Trim a trailing slash so paths can be appended with `format!`.
pub(crate) fn trim_base(base: &str) -> &str {
    base.trim_end_matches('/')
}
