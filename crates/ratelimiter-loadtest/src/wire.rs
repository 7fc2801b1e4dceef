//! Request and response records for the rate limiter HTTP API
//!
//! Decoding fails closed: a body missing a required field decodes to
//! [`LoadTestError::ProtocolMismatch`] rather than to a default value.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::Exchange;
use crate::config::AlgorithmConfig;
use crate::error::{LoadTestError, Result};

/// Path requested on behalf of the simulated client
pub const CLIENT_ENDPOINT: &str = "/api/test";

/// `POST /api/ratelimit/check` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub key: String,
    pub tokens: u32,
    pub client_ip: String,
    pub endpoint: String,
}

impl CheckRequest {
    pub fn new(key: &str, tokens: u32, client_ip: &str) -> Self {
        Self {
            key: key.to_string(),
            tokens,
            client_ip: client_ip.to_string(),
            endpoint: CLIENT_ENDPOINT.to_string(),
        }
    }
}

/// `POST /api/ratelimit/check` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    pub remaining_tokens: Option<i64>,
    pub retry_after_seconds: Option<i64>,
}

/// Body for key and pattern configuration calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitConfigRequest {
    pub algorithm: String,
    pub capacity: u32,
    pub refill_rate: f64,
    pub refill_period_seconds: u64,
}

impl From<&AlgorithmConfig> for LimitConfigRequest {
    fn from(config: &AlgorithmConfig) -> Self {
        Self {
            algorithm: config.name.clone(),
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            refill_period_seconds: config.refill_period_seconds,
        }
    }
}

/// `GET /api/ratelimit/config/{key}` response; extra fields are ignored
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfigResponse {
    pub capacity: u32,
    pub refill_rate: f64,
}

/// Body for the server-side benchmark and regression endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRunRequest {
    pub algorithm: String,
    pub capacity: u32,
    pub refill_rate: f64,
    pub refill_period_seconds: u64,
    pub total_requests: u64,
    pub concurrent_threads: u32,
    pub duration_seconds: u64,
}

/// `GET /actuator/health` response
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub details: ComponentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDetails {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub active_keys: u64,
}

/// Decode a JSON body into `T`, mapping any failure to a protocol mismatch
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Err(LoadTestError::ProtocolMismatch("empty response body".into()));
    }
    serde_json::from_str(body).map_err(|e| LoadTestError::ProtocolMismatch(e.to_string()))
}

// ============================================================================
// VERDICT CLASSIFICATION
// ============================================================================

/// Rate limiter verdict extracted from one check exchange
#[derive(Debug, Clone, PartialEq)]
pub struct CheckVerdict {
    pub allowed: bool,
    pub remaining_tokens: Option<i64>,
    pub retry_after: Option<i64>,
}

/// Status the service uses for rejected requests
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Interpret a check response.
///
/// A 429 is a denial whatever its body says. Any other status must carry a
/// well-formed [`CheckResponse`]. Retry-after comes from the body when
/// present, otherwise from the `Retry-After` header.
pub fn classify_check(exchange: &Exchange) -> Result<CheckVerdict> {
    let header_retry = exchange
        .header("retry-after")
        .and_then(|v| v.trim().parse::<i64>().ok());

    if exchange.status == TOO_MANY_REQUESTS {
        let body = decode::<RetryAfterBody>(&exchange.body).ok();
        return Ok(CheckVerdict {
            allowed: false,
            remaining_tokens: body.as_ref().and_then(|b| b.remaining_tokens),
            retry_after: body.and_then(|b| b.retry_after_seconds).or(header_retry),
        });
    }

    let response: CheckResponse = decode(&exchange.body).map_err(|e| match e {
        LoadTestError::ProtocolMismatch(msg) => {
            LoadTestError::ProtocolMismatch(format!("HTTP {}: {}", exchange.status, msg))
        }
        other => other,
    })?;

    Ok(CheckVerdict {
        allowed: response.allowed,
        remaining_tokens: response.remaining_tokens,
        retry_after: response.retry_after_seconds.or(header_retry),
    })
}

/// Lenient view of a 429 body; such bodies are not guaranteed to be JSON
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryAfterBody {
    remaining_tokens: Option<i64>,
    retry_after_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(status: u16, body: &str, headers: &[(&str, &str)]) -> Exchange {
        Exchange {
            status,
            body: body.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_check_request_wire_shape() {
        let body = serde_json::to_value(CheckRequest::new("k", 2, "10.0.0.1")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "key": "k",
                "tokens": 2,
                "clientIp": "10.0.0.1",
                "endpoint": "/api/test"
            })
        );
    }

    #[test]
    fn test_limit_config_wire_shape() {
        let algo = AlgorithmConfig::new("TOKEN_BUCKET", 100, 10.0, 1);
        let body = serde_json::to_value(LimitConfigRequest::from(&algo)).unwrap();
        assert_eq!(body["refillRate"], 10.0);
        assert_eq!(body["refillPeriodSeconds"], 1);
        assert_eq!(body["algorithm"], "TOKEN_BUCKET");
    }

    #[test]
    fn test_classify_allowed() {
        let verdict = classify_check(&exchange(
            200,
            r#"{"allowed":true,"remainingTokens":7}"#,
            &[],
        ))
        .unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining_tokens, Some(7));
        assert_eq!(verdict.retry_after, None);
    }

    #[test]
    fn test_classify_denied_in_envelope_uses_header_fallback() {
        let verdict = classify_check(&exchange(
            200,
            r#"{"allowed":false}"#,
            &[("retry-after", "3")],
        ))
        .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.retry_after, Some(3));
    }

    #[test]
    fn test_classify_429_with_html_body() {
        let verdict = classify_check(&exchange(
            429,
            "<html>Too Many Requests</html>",
            &[("retry-after", "12")],
        ))
        .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.retry_after, Some(12));
    }

    #[test]
    fn test_classify_429_prefers_body() {
        let verdict = classify_check(&exchange(
            429,
            r#"{"allowed":false,"retryAfterSeconds":4}"#,
            &[("retry-after", "9")],
        ))
        .unwrap();
        assert_eq!(verdict.retry_after, Some(4));
    }

    #[test]
    fn test_classify_missing_allowed_is_mismatch() {
        let err = classify_check(&exchange(200, r#"{"remainingTokens":3}"#, &[])).unwrap_err();
        assert!(matches!(err, LoadTestError::ProtocolMismatch(_)));
    }

    #[test]
    fn test_classify_server_error_is_mismatch() {
        let err = classify_check(&exchange(500, "Internal Server Error", &[])).unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_health_response_decodes_details() {
        let health: HealthResponse = decode(
            r#"{
                "status": "UP",
                "components": {
                    "redisDetailedHealthIndicator": {
                        "status": "UP",
                        "details": {"latencyMs": 3, "activeKeys": 120, "version": "7.2"}
                    },
                    "rateLimiterHealthIndicator": {"status": "UP"}
                }
            }"#,
        )
        .unwrap();
        let redis = &health.components["redisDetailedHealthIndicator"];
        assert_eq!(redis.details.latency_ms, 3);
        assert_eq!(redis.details.active_keys, 120);
        assert_eq!(health.components["rateLimiterHealthIndicator"].details.latency_ms, 0);
    }
}
