//! Phase orchestration
//!
//! Runs the phases of a full session in their fixed order:
//!
//! 1. pre-flight health check
//! 2. pattern configuration push
//! 3. warmup
//! 4. edge-case suite
//! 5. main load phase
//! 6. burst phase
//! 7. server-side benchmarks, then regression analysis
//! 8. reports
//! 9. post-test validation
//!
//! Every phase except the main load phase can be switched off through
//! [`PhaseToggles`](crate::config::PhaseToggles).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::client::ServiceClient;
use crate::config::RunConfig;
use crate::driver::{PhaseResult, PoolConfig, WorkerPool};
use crate::edge_cases::{default_scenarios, run_suite, EdgeCaseSuite, ScenarioContext};
use crate::error::Result;
use crate::health::{recheck, run_preflight, HealthCheckResult};
use crate::metrics::LiveMetrics;
use crate::remote::{run_benchmarks, run_regressions};
use crate::report::{write_artifacts, RunArtifacts, Summary};
use crate::setup::configure_patterns;
use crate::stats::aggregate;
use crate::validation::{evaluate, ValidationReport};

/// How a session ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Strict mode and the pre-flight check failed; nothing else ran
    PreflightFailed(HealthCheckResult),
    Completed(Box<CompletedRun>),
}

#[derive(Debug)]
pub struct CompletedRun {
    pub summary: Summary,
    pub validation: ValidationReport,
    pub artifacts: Vec<PathBuf>,
    pub strict: bool,
}

impl RunOutcome {
    /// Process exit code: 1 only for strict-mode failures
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PreflightFailed(_) => 1,
            Self::Completed(run) if run.strict && !run.validation.passes => 1,
            Self::Completed(_) => 0,
        }
    }
}

/// Runs a complete session against one service
pub struct LoadTestRunner {
    config: RunConfig,
    live: Arc<LiveMetrics>,
}

impl LoadTestRunner {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            live: Arc::new(LiveMetrics::new()?),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn scenario_context(&self) -> ScenarioContext {
        ScenarioContext {
            base_url: self.config.base_url().to_string(),
            request_timeout: self.config.request_timeout(),
            algorithm: self.config.primary_algorithm().clone(),
            settings: self.config.edge_cases.clone(),
            tolerances: self.config.tolerances.clone(),
        }
    }

    /// Run only the edge-case suite
    pub async fn run_edge_cases(&self) -> EdgeCaseSuite {
        run_suite(&self.scenario_context(), &default_scenarios()).await
    }

    async fn run_phase(&self, phase: &str, concurrency: usize, target_rps: u64, duration_secs: u64) -> Result<PhaseResult> {
        let pool = WorkerPool::new(
            PoolConfig {
                phase: phase.to_string(),
                base_url: self.config.base_url().to_string(),
                concurrency,
                target_rps,
                duration: Duration::from_secs(duration_secs),
                seed: self.config.seed,
                request_timeout: self.config.request_timeout(),
            },
            &self.config.algorithms,
            &self.config.endpoints,
            self.live.clone(),
        )?;
        pool.run().await
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let config = &self.config;
        let phases = &config.phases;
        let strict = config.strict_validation;
        let client = ServiceClient::new(config.base_url(), config.request_timeout())?;

        info!(
            "Rate limiter load test: {} for {}s, {} workers at {} RPS (seed {})",
            config.base_url(),
            config.duration_secs,
            config.concurrency,
            config.target_rps,
            config.seed
        );

        let health = if phases.health_checks {
            let health = run_preflight(&client).await;
            if !health.passed {
                if strict {
                    error!("Pre-flight checks failed in strict mode, aborting");
                    return Ok(RunOutcome::PreflightFailed(health));
                }
                warn!("Pre-flight checks failed, continuing anyway");
            }
            Some(health)
        } else {
            None
        };

        if phases.setup && !configure_patterns(&client, &config.algorithms).await {
            warn!("Some algorithm patterns were not configured; using the service's live configuration");
        }

        if config.warmup_secs > 0 {
            info!("Warming up for {}s", config.warmup_secs);
            tokio::time::sleep(Duration::from_secs(config.warmup_secs)).await;
        }

        let edge_cases = if phases.edge_cases {
            Some(self.run_edge_cases().await)
        } else {
            None
        };

        let main = self
            .run_phase("main", config.concurrency, config.target_rps, config.duration_secs)
            .await?;

        let burst = if phases.burst {
            let multiplier = config.burst.multiplier.max(1);
            Some(
                self.run_phase(
                    "burst",
                    config.concurrency.saturating_mul(multiplier),
                    config.target_rps.saturating_mul(multiplier as u64),
                    config.burst.duration_secs,
                )
                .await?,
            )
        } else {
            None
        };

        let benchmarks = if phases.benchmark {
            Some(run_benchmarks(config.base_url(), &config.algorithms, &config.remote).await?)
        } else {
            None
        };

        let regressions = if phases.performance {
            Some(run_regressions(config.base_url(), &config.algorithms, &config.remote).await?)
        } else {
            None
        };

        let run = RunArtifacts {
            config,
            main: &main,
            burst: burst.as_ref(),
            health: health.as_ref(),
            edge_cases: edge_cases.as_ref(),
            benchmarks: benchmarks.as_ref(),
            regressions: regressions.as_ref(),
            live: &self.live,
        };
        let summary = Summary::build(&run);
        let artifacts = write_artifacts(&config.output_dir, &run, &summary)?;
        summary.print_report();

        let main_stats = aggregate(&main.log, main.elapsed_secs() as f64);
        let mut validation = evaluate(&main_stats, &config.thresholds, strict);
        validation.add_health_check(recheck(&client).await);
        validation.print_report();

        if !validation.passes {
            if strict {
                error!("Post-test validation failed");
            } else {
                warn!("Post-test validation failed (not strict, exit code unaffected)");
            }
        }
        info!("Results saved to {}", config.output_dir.display());

        Ok(RunOutcome::Completed(Box::new(CompletedRun {
            summary,
            validation,
            artifacts,
            strict,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationCheck;

    fn completed(strict: bool, passes: bool) -> RunOutcome {
        RunOutcome::Completed(Box::new(CompletedRun {
            summary: serde_json::from_value(serde_json::json!({
                "test_info": {
                    "timestamp": "2026-01-01T00:00:00Z",
                    "duration_seconds": 1,
                    "concurrency": 1,
                    "target_rps": 1,
                    "base_url": "http://localhost:8080",
                    "seed": 42
                },
                "health_check": null,
                "edge_case_tests": null,
                "overall": {
                    "total_requests": 0, "allowed": 0, "denied": 0, "errors": 0, "rps": 0.0,
                    "success_rate_percent": 0.0, "error_rate_percent": 0.0,
                    "latency_ms": {
                        "min": 0.0, "max": 0.0, "avg": 0.0, "median": 0.0, "p50": 0.0, "p75": 0.0,
                        "p90": 0.0, "p95": 0.0, "p99": 0.0, "p999": 0.0, "std_dev": 0.0
                    }
                },
                "by_algorithm": {},
                "by_endpoint": {},
                "by_algorithm_and_endpoint": {},
                "burst_test": null,
                "benchmark_results": null,
                "performance_results": null
            }))
            .unwrap(),
            validation: ValidationReport {
                passes,
                checks: vec![ValidationCheck {
                    name: "Error rate <= 5%".into(),
                    passed: passes,
                    enforced: true,
                    actual: "0.00%".into(),
                    expected: "<=5%".into(),
                }],
            },
            artifacts: Vec::new(),
            strict,
        }))
    }

    #[test]
    fn test_exit_code_only_for_strict_failures() {
        assert_eq!(completed(false, true).exit_code(), 0);
        assert_eq!(completed(false, false).exit_code(), 0);
        assert_eq!(completed(true, true).exit_code(), 0);
        assert_eq!(completed(true, false).exit_code(), 1);
        assert_eq!(RunOutcome::PreflightFailed(HealthCheckResult::default()).exit_code(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RunConfig {
            concurrency: 0,
            ..RunConfig::default()
        };
        assert!(LoadTestRunner::new(config).is_err());
    }

    #[test]
    fn test_scenario_context_uses_primary_algorithm() {
        let runner = LoadTestRunner::new(RunConfig::default()).unwrap();
        let ctx = runner.scenario_context();
        assert_eq!(ctx.algorithm.name, "TOKEN_BUCKET");
        assert_eq!(ctx.base_url, "http://localhost:8080");
        assert_eq!(ctx.settings.exhaust_capacity, 10);
    }
}
