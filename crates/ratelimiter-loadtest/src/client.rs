//! HTTP exchange adapter
//!
//! A [`ServiceClient`] is owned by exactly one worker or scenario and keeps a
//! single pooled connection to the service alive for its lifetime.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::{AlgorithmConfig, EndpointKind};
use crate::error::Result;
use crate::wire::{CheckRequest, LimitConfigRequest, ServerRunRequest};

/// HTTP methods used against the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Typed request bodies
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Check(CheckRequest),
    LimitConfig(LimitConfigRequest),
    ServerRun(ServerRunRequest),
}

/// One request to issue
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<RequestBody>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// Rate limit check for `key`
    pub fn check(key: &str, tokens: u32, client_ip: &str) -> Self {
        Self::post(
            "/api/ratelimit/check",
            RequestBody::Check(CheckRequest::new(key, tokens, client_ip)),
        )
    }

    /// Per-key limit configuration
    pub fn save_key_config(key: &str, config: LimitConfigRequest) -> Self {
        Self::post(
            format!("/api/ratelimit/config/keys/{key}"),
            RequestBody::LimitConfig(config),
        )
    }

    /// Pattern limit configuration
    pub fn save_pattern_config(pattern: &str, config: LimitConfigRequest) -> Self {
        Self::post(
            format!("/api/ratelimit/config/patterns/{pattern}"),
            RequestBody::LimitConfig(config),
        )
    }

    /// Build the request for a logical endpoint.
    ///
    /// Shared by the load driver and the edge-case validator so every caller
    /// produces identical wire traffic for the same endpoint.
    pub fn for_endpoint(
        kind: EndpointKind,
        key: &str,
        tokens: u32,
        client_ip: &str,
        algorithm: &str,
        config: &AlgorithmConfig,
    ) -> Self {
        match kind {
            EndpointKind::RateLimitCheck => Self::check(key, tokens, client_ip),
            EndpointKind::GetConfig => Self::get(format!("/api/ratelimit/config/{key}")),
            EndpointKind::AdminStats => Self::get("/api/admin/stats"),
            EndpointKind::AdminKeys => Self::get("/api/admin/keys?limit=50"),
            EndpointKind::GetPatterns => Self::get("/api/ratelimit/config/patterns"),
            EndpointKind::SaveConfig => Self::save_key_config(
                key,
                LimitConfigRequest {
                    algorithm: algorithm.to_string(),
                    ..LimitConfigRequest::from(config)
                },
            ),
            EndpointKind::HealthCheck => Self::get("/actuator/health"),
            EndpointKind::Metrics => Self::get("/actuator/metrics"),
        }
    }
}

/// Result of one request/response cycle
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    pub body: String,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
}

impl Exchange {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client bound to one worker or scenario
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    /// Create a client holding at most one idle connection to the service
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request; any transport or body-read failure is a `Transport` error
    pub async fn execute(&self, request: &RequestSpec) -> Result<Exchange> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
        }
        .header(reqwest::header::ACCEPT, "application/json");

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(Exchange {
            status,
            body,
            headers,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Exchange> {
        self.execute(&RequestSpec::get(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadTestError;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn algo() -> AlgorithmConfig {
        AlgorithmConfig::new("TOKEN_BUCKET", 100, 10.0, 1)
    }

    #[test]
    fn test_request_builder_paths() {
        let cases = [
            (EndpointKind::RateLimitCheck, "/api/ratelimit/check"),
            (EndpointKind::GetConfig, "/api/ratelimit/config/tb:user:guest:1"),
            (EndpointKind::AdminKeys, "/api/admin/keys?limit=50"),
            (EndpointKind::SaveConfig, "/api/ratelimit/config/keys/tb:user:guest:1"),
            (EndpointKind::Metrics, "/actuator/metrics"),
        ];
        for (kind, expected) in cases {
            let spec =
                RequestSpec::for_endpoint(kind, "tb:user:guest:1", 1, "10.0.0.1", "TOKEN_BUCKET", &algo());
            assert_eq!(spec.path, expected);
            assert_eq!(spec.method, kind.method());
            assert_eq!(spec.body.is_some(), spec.method == HttpMethod::Post);
        }
    }

    #[test]
    fn test_save_config_uses_profile_algorithm() {
        let spec = RequestSpec::for_endpoint(
            EndpointKind::SaveConfig,
            "k",
            1,
            "10.0.0.1",
            "LEAKY_BUCKET",
            &algo(),
        );
        let body = serde_json::to_value(spec.body.unwrap()).unwrap();
        assert_eq!(body["algorithm"], "LEAKY_BUCKET");
        assert_eq!(body["capacity"], 100);
    }

    #[tokio::test]
    async fn test_execute_post_returns_status_body_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ratelimit/check"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "key": "k1",
                "tokens": 1,
                "clientIp": "127.0.0.1",
                "endpoint": "/api/test"
            })))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "5")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let exchange = client
            .execute(&RequestSpec::check("k1", 1, "127.0.0.1"))
            .await
            .unwrap();

        assert_eq!(exchange.status, 429);
        assert_eq!(exchange.body, "slow down");
        assert_eq!(exchange.header("Retry-After"), Some("5"));
        assert!(!exchange.is_success());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = ServiceClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = client.get("/actuator/health").await.unwrap_err();
        assert!(matches!(err, LoadTestError::Transport(_)));
    }
}
