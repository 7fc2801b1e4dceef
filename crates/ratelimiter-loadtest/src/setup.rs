//! Limit configuration pushed to the service
//!
//! Failures here are never fatal: the run continues with whatever
//! configuration is live server-side, and every rejection is logged.

use tracing::{info, warn};

use crate::client::{RequestSpec, ServiceClient};
use crate::config::AlgorithmConfig;
use crate::error::{LoadTestError, Result};
use crate::wire::{decode, KeyConfigResponse, LimitConfigRequest};

/// Allowed drift between the written and read-back refill rate
const REFILL_RATE_EPSILON: f64 = 0.001;

fn accepted(status: u16) -> bool {
    status == 200 || status == 201
}

/// Register one pattern configuration per algorithm (`<algorithm>:*`).
///
/// Returns `true` when every algorithm was accepted.
pub async fn configure_patterns(client: &ServiceClient, algorithms: &[AlgorithmConfig]) -> bool {
    info!("Configuring {} algorithm patterns", algorithms.len());
    let mut all_ok = true;

    for algorithm in algorithms {
        let pattern = algorithm.pattern();
        let request = RequestSpec::save_pattern_config(&pattern, LimitConfigRequest::from(algorithm));

        match client.execute(&request).await {
            Ok(exchange) if accepted(exchange.status) => {
                info!(
                    "Configured {}: capacity={}, refillRate={}, period={}s",
                    algorithm.name,
                    algorithm.capacity,
                    algorithm.refill_rate,
                    algorithm.refill_period_seconds
                );
            }
            Ok(exchange) => {
                let err = LoadTestError::Configuration {
                    target: pattern,
                    status: exchange.status,
                };
                warn!("{}", err);
                all_ok = false;
            }
            Err(e) => {
                warn!("Error configuring {}: {}", algorithm.name, e);
                all_ok = false;
            }
        }
    }

    all_ok
}

/// Configure a single key and read it back.
///
/// A rejected write is returned as [`LoadTestError::Configuration`]. A
/// read-back mismatch is only logged, since the write itself succeeded.
pub async fn configure_key(client: &ServiceClient, key: &str, config: &AlgorithmConfig) -> Result<()> {
    let exchange = client
        .execute(&RequestSpec::save_key_config(key, LimitConfigRequest::from(config)))
        .await?;

    if !accepted(exchange.status) {
        if !exchange.body.is_empty() {
            let preview: String = exchange.body.chars().take(200).collect();
            warn!("Configuration of {} rejected: {}", key, preview);
        }
        return Err(LoadTestError::Configuration {
            target: key.to_string(),
            status: exchange.status,
        });
    }

    verify_key(client, key, config).await;
    Ok(())
}

async fn verify_key(client: &ServiceClient, key: &str, expected: &AlgorithmConfig) {
    let exchange = match client.get(&format!("/api/ratelimit/config/{key}")).await {
        Ok(exchange) if exchange.status == 200 => exchange,
        Ok(_) => return,
        Err(e) => {
            warn!("Could not read back configuration for {}: {}", key, e);
            return;
        }
    };

    match decode::<KeyConfigResponse>(&exchange.body) {
        Ok(actual) => {
            if actual.capacity != expected.capacity
                || (actual.refill_rate - expected.refill_rate).abs() > REFILL_RATE_EPSILON
            {
                warn!(
                    "Config mismatch for {}: expected capacity={}, refillRate={}; got capacity={}, refillRate={}",
                    key, expected.capacity, expected.refill_rate, actual.capacity, actual.refill_rate
                );
            }
        }
        Err(e) => warn!("Unreadable configuration for {}: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_algorithms;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_configure_patterns_posts_each_algorithm() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/ratelimit/config/patterns/.+"))
            .respond_with(ResponseTemplate::new(201))
            .expect(5)
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        assert!(configure_patterns(&client, &default_algorithms()).await);
    }

    #[tokio::test]
    async fn test_configure_patterns_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        assert!(!configure_patterns(&client, &default_algorithms()).await);
    }

    #[tokio::test]
    async fn test_configure_key_sends_limit_body() {
        let server = MockServer::start().await;
        let config = AlgorithmConfig::new("TOKEN_BUCKET", 10, 0.001, 3600);
        Mock::given(method("POST"))
            .and(path("/api/ratelimit/config/keys/edgecase:test"))
            .and(body_json(serde_json::json!({
                "algorithm": "TOKEN_BUCKET",
                "capacity": 10,
                "refillRate": 0.001,
                "refillPeriodSeconds": 3600
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ratelimit/config/edgecase:test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"capacity": 10, "refillRate": 0.001})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        configure_key(&client, "edgecase:test", &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_key_rejection_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad algorithm"))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = configure_key(&client, "k", &default_algorithms()[0]).await.unwrap_err();
        assert!(matches!(err, LoadTestError::Configuration { status: 400, .. }));
    }
}
