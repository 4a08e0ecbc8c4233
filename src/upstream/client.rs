//! # Upstream Client
//!
//! Single-flight outbound HTTP calls to backend services. One call per
//! invocation: build the URL, forward only safe headers, apply the
//! per-upstream timeout, and hand back the raw response.
//!
//! Failure classes: network/timeout errors are `Transport`, HTTP >= 400 is
//! `UpstreamStatus` (used by orchestrators; the proxy strategy relays those
//! statuses verbatim instead), and an unreadable body is `Decode`.

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Hop-by-hop headers that must never be forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Whether an inbound header may be replayed on an outbound call
///
/// Drops the hop-by-hop set, `host`, and `content-length`; the client
/// computes both for the outbound request, and captured bodies may re-encode
/// to a different length than the inbound payload.
pub fn is_forwardable_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower != "host" && lower != "content-length" && !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// Classified outbound failure
#[derive(Debug, Error)]
pub enum CallFailure {
    /// Network error or per-call deadline exceeded
    #[error("request failed: {0}")]
    Transport(String),

    /// Upstream answered with an error status
    #[error("service returned error status: {0}")]
    UpstreamStatus(u16),

    /// Upstream body could not be read
    #[error("failed to read response body: {0}")]
    Decode(String),
}

/// One outbound call description
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Duration,

    /// Propagated as `X-Request-ID` for cross-service tracing
    pub request_id: String,
}

impl UpstreamCall {
    pub fn new(method: Method, url: impl Into<String>, request_id: &str) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(10),
            request_id: request_id.to_string(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Raw upstream response: status, first-value headers, body bytes
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// Outbound HTTP client shared by every strategy
///
/// Wraps one `reqwest::Client` so connection pooling spans requests; the
/// per-call timeout comes from the upstream configuration, not the client.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Issue the call and return the raw response regardless of status
    ///
    /// Only network-level failures surface as errors here; status handling is
    /// the caller's business.
    pub async fn send(&self, call: UpstreamCall) -> Result<UpstreamResponse, CallFailure> {
        debug!(
            method = %call.method,
            url = %call.url,
            timeout_ms = call.timeout.as_millis() as u64,
            "Dispatching upstream call"
        );

        let method = reqwest::Method::from_bytes(call.method.as_str().as_bytes())
            .map_err(|e| CallFailure::Transport(e.to_string()))?;

        let mut request = self
            .http
            .request(method, &call.url)
            .timeout(call.timeout)
            .header("x-request-id", &call.request_id);

        for (name, value) in &call.headers {
            if is_forwardable_header(name) {
                request = request.header(name, value);
            }
        }
        if let Some(body) = call.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(classify_transport)?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| CallFailure::Decode(e.to_string()))?;
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            let key = name.as_str().to_ascii_lowercase();
            if let Ok(text) = value.to_str() {
                headers.entry(key).or_insert_with(|| text.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CallFailure::Decode(e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    /// Issue the call and decode a success body for an orchestrator
    ///
    /// HTTP >= 400 becomes `UpstreamStatus`; the body decodes to JSON when it
    /// parses, otherwise it is kept as a raw string value.
    pub async fn fetch_value(&self, call: UpstreamCall) -> Result<Value, CallFailure> {
        let response = self.send(call).await?;
        if response.status.as_u16() >= 400 {
            return Err(CallFailure::UpstreamStatus(response.status.as_u16()));
        }
        Ok(decode_body_value(&response.body))
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a body into JSON when possible, falling back to a string value
pub fn decode_body_value(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

fn classify_transport(err: reqwest::Error) -> CallFailure {
    if err.is_timeout() {
        CallFailure::Transport(format!("request timed out: {err}"))
    } else {
        CallFailure::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_are_rejected() {
        for name in [
            "Connection",
            "Keep-Alive",
            "Proxy-Authenticate",
            "Proxy-Authorization",
            "TE",
            "Trailers",
            "Transfer-Encoding",
            "Upgrade",
            "Host",
            "Content-Length",
        ] {
            assert!(!is_forwardable_header(name), "{name} must not forward");
        }
    }

    #[test]
    fn test_end_to_end_headers_are_forwardable() {
        for name in ["Authorization", "Content-Type", "Accept", "X-API-Key"] {
            assert!(is_forwardable_header(name), "{name} must forward");
        }
    }

    #[test]
    fn test_decode_body_value_json_or_string() {
        let json = Bytes::from_static(b"{\"a\":1}");
        assert_eq!(decode_body_value(&json), serde_json::json!({"a": 1}));

        let text = Bytes::from_static(b"plain text");
        assert_eq!(decode_body_value(&text), Value::String("plain text".into()));
    }

    #[test]
    fn test_call_builder() {
        let call = UpstreamCall::new(Method::GET, "http://localhost:8000/api/v1/metrics", "rid-1")
            .header("x-plant-id", "7")
            .timeout(Duration::from_secs(15));
        assert_eq!(call.timeout, Duration::from_secs(15));
        assert_eq!(call.headers.get("x-plant-id").unwrap(), "7");
        assert!(call.body.is_none());
    }
}
