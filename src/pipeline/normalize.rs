//! # Response Normalizer
//!
//! Converts what a strategy returns (a raw upstream HTTP response or a
//! synthesized value) into the uniform gateway response.
//!
//! The body tag is decided by the upstream content-type, never by probing:
//! image and octet-stream payloads stay raw bytes and are flagged
//! `is_binary`; everything else goes through the JSON-then-text decode
//! ladder, with an empty body becoming an empty JSON object.

use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::core::types::{BodyKind, GatewayResponse};
use crate::strategies::StrategyOutput;
use crate::upstream::UpstreamResponse;

/// Convert a strategy result into the response the gateway emits
pub fn normalize(output: StrategyOutput) -> GatewayResponse {
    match output {
        StrategyOutput::Upstream(response) => normalize_upstream(response),
        StrategyOutput::Value(value) => GatewayResponse::json(StatusCode::OK, value),
    }
}

fn normalize_upstream(response: UpstreamResponse) -> GatewayResponse {
    let is_binary = response
        .content_type()
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("image/") || ct.starts_with("application/octet-stream")
        })
        .unwrap_or(false);

    let mut normalized = GatewayResponse {
        status: response.status,
        headers: response.headers.clone(),
        body: BodyKind::Empty,
        metadata: Default::default(),
    };

    if is_binary {
        normalized.body = BodyKind::Raw(response.body);
        normalized
            .metadata
            .insert("is_binary".to_string(), Value::Bool(true));
        return normalized;
    }

    normalized.body = if response.body.is_empty() {
        BodyKind::Json(json!({}))
    } else {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => BodyKind::Json(value),
            Err(_) => BodyKind::Text(String::from_utf8_lossy(&response.body).into_owned()),
        }
    };
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;

    fn upstream(status: u16, content_type: Option<&str>, body: &[u8]) -> UpstreamResponse {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        UpstreamResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_json_body_is_decoded() {
        let response = normalize(StrategyOutput::Upstream(upstream(
            200,
            Some("application/json"),
            b"{\"a\":1}",
        )));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_json().unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn test_non_json_text_is_kept_as_string() {
        let response = normalize(StrategyOutput::Upstream(upstream(
            200,
            Some("text/plain"),
            b"pong",
        )));
        match response.body {
            BodyKind::Text(text) => assert_eq!(text, "pong"),
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_body_becomes_empty_object() {
        let response = normalize(StrategyOutput::Upstream(upstream(204, None, b"")));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.body.as_json().unwrap(), &json!({}));
    }

    #[test]
    fn test_binary_passthrough_sets_metadata() {
        let payload = [0x89u8, 0x50, 0x4e, 0x47];
        let response = normalize(StrategyOutput::Upstream(upstream(
            200,
            Some("image/png"),
            &payload,
        )));
        assert_eq!(response.metadata.get("is_binary"), Some(&Value::Bool(true)));
        match response.body {
            BodyKind::Raw(bytes) => assert_eq!(&bytes[..], &payload),
            other => panic!("expected raw body, got {other:?}"),
        }

        let stream = normalize(StrategyOutput::Upstream(upstream(
            200,
            Some("application/octet-stream"),
            b"blob",
        )));
        assert_eq!(stream.metadata.get("is_binary"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_upstream_error_status_is_preserved() {
        let response = normalize(StrategyOutput::Upstream(upstream(
            503,
            Some("application/json"),
            b"{\"error\":\"down\"}",
        )));
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_strategy_value_emits_ok_json() {
        let response = normalize(StrategyOutput::Value(json!({"plants": []})));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.headers.get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(response.body.as_json().unwrap(), &json!({"plants": []}));
    }
}
