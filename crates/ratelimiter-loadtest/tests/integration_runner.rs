//! Integration tests for full load test sessions
//!
//! These tests drive the runner end to end against a mocked rate limiter
//! service with short phases, then inspect the written artifacts and the
//! exit decision.

use ratelimiter_loadtest::report::Summary;
use ratelimiter_loadtest::runner::{LoadTestRunner, RunOutcome};
use ratelimiter_loadtest::RunConfig;
use serde_json::json;
use wiremock::matchers::{any, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn healthy_body() -> serde_json::Value {
    json!({
        "status": "UP",
        "components": {
            "redisDetailedHealthIndicator": {
                "status": "UP",
                "details": {"latencyMs": 2, "activeKeys": 17}
            },
            "rateLimiterHealthIndicator": {"status": "UP"}
        }
    })
}

/// Service that allows every check and accepts everything else
async fn permissive_service() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(healthy_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ratelimit/check"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"allowed": true, "remainingTokens": 42})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/api/(benchmark|performance)/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "OK", "message": "stable"})))
        .mount(&server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    server
}

fn short_config(base_url: &str, output: &std::path::Path) -> RunConfig {
    RunConfig::from_toml_str(&format!(
        r#"
base_url = "{base_url}"
duration_secs = 1
warmup_secs = 0
concurrency = 2
target_rps = 20
request_timeout_secs = 2
output_dir = "{}"
raw_csv = true

[phases]
edge_cases = false

[burst]
multiplier = 2
duration_secs = 1
"#,
        output.display()
    ))
    .unwrap()
}

mod session_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_session_writes_artifacts() {
        let server = permissive_service().await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");

        let runner = LoadTestRunner::new(short_config(&server.uri(), &out)).unwrap();
        let outcome = runner.run().await.unwrap();
        assert_eq!(outcome.exit_code(), 0);

        let RunOutcome::Completed(run) = outcome else {
            panic!("session should complete");
        };
        assert!(run.validation.passes);
        assert!(run.summary.overall.total_requests > 0);
        assert_eq!(run.summary.overall.errors, 0);
        assert_eq!(run.summary.benchmark_results.as_ref().unwrap().len(), 5);
        assert_eq!(run.summary.performance_results.as_ref().unwrap().len(), 5);
        assert!(run.summary.burst_test.is_some());
        assert!(run.summary.health_check.as_ref().unwrap().passed);
        assert!(run.summary.edge_case_tests.is_none());

        for name in [
            "summary.json",
            "timeline.json",
            "timeline_burst.json",
            "raw_metrics.csv",
            "metrics.prom",
        ] {
            assert!(out.join(name).exists(), "missing {name}");
        }

        let reloaded: Summary =
            serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(reloaded.overall, run.summary.overall);
        assert_eq!(reloaded.test_info.seed, 42);

        ratelimiter_loadtest::analysis::analyze(&out, true).unwrap();
    }

    #[tokio::test]
    async fn test_strict_preflight_failure_aborts() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");

        let mut config = short_config(&server.uri(), &out);
        config.strict_validation = true;

        let outcome = LoadTestRunner::new(config).unwrap().run().await.unwrap();
        assert_eq!(outcome.exit_code(), 1);
        match outcome {
            RunOutcome::PreflightFailed(health) => {
                assert!(!health.passed);
                assert!(!health.issues.is_empty());
            }
            RunOutcome::Completed(_) => panic!("strict pre-flight failure must abort"),
        }
        assert!(!out.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_rate_fails_validation_only_when_strict() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let mut config = short_config(&server.uri(), &dir.path().join("lenient"));
        config.phases.health_checks = false;
        config.phases.setup = false;
        config.phases.burst = false;
        config.phases.benchmark = false;
        config.phases.performance = false;

        let lenient = LoadTestRunner::new(config.clone()).unwrap().run().await.unwrap();
        assert_eq!(lenient.exit_code(), 0);
        let RunOutcome::Completed(run) = &lenient else {
            panic!("session should complete");
        };
        assert!(!run.validation.passes);
        assert!(run.summary.overall.errors > 0);
        assert!(run.summary.benchmark_results.is_none());
        assert!(run.summary.health_check.is_none());
        assert!(run
            .validation
            .checks
            .iter()
            .any(|c| c.name == "System health UP after test" && !c.passed));

        config.strict_validation = true;
        config.output_dir = dir.path().join("strict");
        let strict = LoadTestRunner::new(config).unwrap().run().await.unwrap();
        assert_eq!(strict.exit_code(), 1);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_toml_overrides_and_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
base_url = "http://limiter.internal:9000/"
concurrency = 8
seed = 7

[thresholds]
max_error_rate_percent = 1.0

[tolerances]
burst_margin = 4
"#,
        )
        .unwrap();

        assert_eq!(config.base_url(), "http://limiter.internal:9000");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.seed, 7);
        assert_eq!(config.duration_secs, 180);
        assert_eq!(config.target_rps, 1000);
        assert_eq!(config.algorithms.len(), 5);
        assert_eq!(config.endpoints.len(), 8);
        assert_eq!(config.thresholds.max_error_rate_percent, 1.0);
        assert_eq!(config.thresholds.max_p99_ms, 200.0);
        assert_eq!(config.tolerances.burst_margin, 4);
        assert!(config.phases.burst);
    }

    #[test]
    fn test_rejects_unrunnable_configs() {
        assert!(RunConfig::from_toml_str("concurrency = 0").is_err());
        assert!(RunConfig::from_toml_str("base_url = \"ftp://nope\"").is_err());
        assert!(RunConfig::from_toml_str("algorithms = []").is_err());
        assert!(RunConfig::from_toml_str("concurrency = \"many\"").is_err());
    }
}
