//! Server-side benchmark and regression runs
//!
//! Both endpoints trigger heavy synchronous work on the service, so calls go
//! out one algorithm at a time, each with its own long timeout. Results are
//! opaque and passed straight through to the report.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{RequestBody, RequestSpec, ServiceClient};
use crate::config::{AlgorithmConfig, RemoteRunSettings};
use crate::error::Result;
use crate::wire::{decode, ServerRunRequest};

pub const BENCHMARK_PATH: &str = "/api/benchmark/run";
pub const REGRESSION_PATH: &str = "/api/performance/run-and-analyze";

/// Opaque per-algorithm results keyed by algorithm name
pub type RemoteResults = BTreeMap<String, serde_json::Value>;

/// `status` field of a regression analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegressionStatus {
    Ok,
    Baseline,
    RegressionDetected,
    Unknown,
}

impl RegressionStatus {
    pub fn of(result: &serde_json::Value) -> Self {
        match result.get("status").and_then(|s| s.as_str()) {
            Some("OK") => Self::Ok,
            Some("BASELINE") => Self::Baseline,
            Some("REGRESSION_DETECTED") => Self::RegressionDetected,
            _ => Self::Unknown,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Ok => "✓",
            Self::RegressionDetected => "⚠",
            Self::Baseline | Self::Unknown => "ℹ",
        }
    }
}

impl fmt::Display for RegressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Baseline => "BASELINE",
            Self::RegressionDetected => "REGRESSION_DETECTED",
            Self::Unknown => "UNKNOWN",
        })
    }
}

fn run_request(path: &str, algorithm: &AlgorithmConfig, settings: &RemoteRunSettings) -> RequestSpec {
    RequestSpec::post(
        path,
        RequestBody::ServerRun(ServerRunRequest {
            algorithm: algorithm.name.clone(),
            capacity: algorithm.capacity,
            refill_rate: algorithm.refill_rate,
            refill_period_seconds: algorithm.refill_period_seconds,
            total_requests: settings.total_requests,
            concurrent_threads: settings.concurrent_threads,
            duration_seconds: settings.duration_seconds,
        }),
    )
}

/// POST one run request per algorithm, keeping the 200 responses
async fn run_each(
    base_url: &str,
    path: &str,
    timeout: Duration,
    algorithms: &[AlgorithmConfig],
    settings: &RemoteRunSettings,
) -> Result<Vec<(String, serde_json::Value)>> {
    let client = ServiceClient::new(base_url, timeout)?;
    let mut results = Vec::new();

    for algorithm in algorithms {
        match client.execute(&run_request(path, algorithm, settings)).await {
            Ok(exchange) if exchange.status == 200 => match decode(&exchange.body) {
                Ok(value) => results.push((algorithm.name.clone(), value)),
                Err(e) => warn!("{}: {}", algorithm.name, e),
            },
            Ok(exchange) => warn!("{}: HTTP {}", algorithm.name, exchange.status),
            Err(e) => warn!("{}: {}", algorithm.name, e),
        }
    }
    Ok(results)
}

/// Invoke the server-side benchmark for every algorithm
pub async fn run_benchmarks(
    base_url: &str,
    algorithms: &[AlgorithmConfig],
    settings: &RemoteRunSettings,
) -> Result<RemoteResults> {
    info!("Running server-side benchmarks for {} algorithms", algorithms.len());
    let timeout = Duration::from_secs(settings.benchmark_timeout_secs);
    let results = run_each(base_url, BENCHMARK_PATH, timeout, algorithms, settings).await?;

    for (name, result) in &results {
        info!(
            "{}: {:.2} RPS, P95={}µs",
            name,
            result.get("throughputRps").and_then(|v| v.as_f64()).unwrap_or(0.0),
            result
                .pointer("/latency/p95Micros")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        );
    }
    Ok(results.into_iter().collect())
}

/// Invoke the server-side regression analysis for every algorithm
pub async fn run_regressions(
    base_url: &str,
    algorithms: &[AlgorithmConfig],
    settings: &RemoteRunSettings,
) -> Result<RemoteResults> {
    info!("Running regression analysis for {} algorithms", algorithms.len());
    let timeout = Duration::from_secs(settings.regression_timeout_secs);
    let results = run_each(base_url, REGRESSION_PATH, timeout, algorithms, settings).await?;

    for (name, result) in &results {
        let status = RegressionStatus::of(result);
        let message = result.get("message").and_then(|m| m.as_str()).unwrap_or("");
        match status {
            RegressionStatus::RegressionDetected => warn!("{}: REGRESSION - {}", name, message),
            _ => info!("{}: {} - {}", name, status, message),
        }
    }
    Ok(results.into_iter().collect())
}

/// Count regression results per status
pub fn regression_counts(results: &RemoteResults) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for result in results.values() {
        *counts.entry(RegressionStatus::of(result).to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_algorithms;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_regression_status_parsing() {
        assert_eq!(RegressionStatus::of(&json!({"status": "OK"})), RegressionStatus::Ok);
        assert_eq!(
            RegressionStatus::of(&json!({"status": "REGRESSION_DETECTED"})),
            RegressionStatus::RegressionDetected
        );
        assert_eq!(RegressionStatus::of(&json!({})), RegressionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_benchmarks_pass_results_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BENCHMARK_PATH))
            .and(body_partial_json(json!({
                "totalRequests": 10000,
                "concurrentThreads": 50,
                "durationSeconds": 60
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "throughputRps": 5123.4,
                "latency": {"p95Micros": 800}
            })))
            .expect(5)
            .mount(&server)
            .await;

        let results = run_benchmarks(&server.uri(), &default_algorithms(), &RemoteRunSettings::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results["LEAKY_BUCKET"]["throughputRps"], 5123.4);
    }

    #[tokio::test]
    async fn test_failed_algorithms_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REGRESSION_PATH))
            .and(body_partial_json(json!({"algorithm": "TOKEN_BUCKET"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "REGRESSION_DETECTED", "message": "p99 +40%"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REGRESSION_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let results = run_regressions(&server.uri(), &default_algorithms(), &RemoteRunSettings::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(regression_counts(&results)["REGRESSION_DETECTED"], 1);
    }
}
