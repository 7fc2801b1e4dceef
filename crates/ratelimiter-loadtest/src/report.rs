//! Run reports
//!
//! Builds the persisted summary document, writes every artifact into the
//! output directory and prints the console summary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RunConfig;
use crate::driver::PhaseResult;
use crate::edge_cases::{EdgeCaseResult, EdgeCaseSuite};
use crate::error::Result;
use crate::health::HealthCheckResult;
use crate::metrics::LiveMetrics;
use crate::outcome::{OutcomeLog, RequestOutcome};
use crate::remote::{regression_counts, RegressionStatus, RemoteResults};
use crate::stats::{aggregate, percent_increase, AggregateStats};
use crate::timeline::{Spike, Timeline};

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ============================================================================
// DOCUMENTS
// ============================================================================

/// Latency block of a [`StatsDocument`], rounded to microseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyDocument {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub std_dev: f64,
}

/// Persisted form of [`AggregateStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsDocument {
    pub total_requests: usize,
    pub allowed: usize,
    pub denied: usize,
    pub errors: usize,
    pub rps: f64,
    pub success_rate_percent: f64,
    pub error_rate_percent: f64,
    pub latency_ms: LatencyDocument,
}

impl From<&AggregateStats> for StatsDocument {
    fn from(s: &AggregateStats) -> Self {
        Self {
            total_requests: s.total,
            allowed: s.allowed,
            denied: s.denied,
            errors: s.errors,
            rps: round_to(s.rps, 2),
            success_rate_percent: round_to(s.success_rate, 2),
            error_rate_percent: round_to(s.error_rate, 2),
            latency_ms: LatencyDocument {
                min: round_to(s.min_ms, 3),
                max: round_to(s.max_ms, 3),
                avg: round_to(s.avg_ms, 3),
                median: round_to(s.median_ms, 3),
                p50: round_to(s.p50_ms, 3),
                p75: round_to(s.p75_ms, 3),
                p90: round_to(s.p90_ms, 3),
                p95: round_to(s.p95_ms, 3),
                p99: round_to(s.p99_ms, 3),
                p999: round_to(s.p999_ms, 3),
                std_dev: round_to(s.std_dev_ms, 3),
            },
        }
    }
}

/// Burst phase degradation relative to the main phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub latency_p95_increase_pct: f64,
    pub latency_p99_increase_pct: f64,
    /// Absolute difference in error rate, in percentage points
    pub error_rate_increase_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstAnalysis {
    pub overall: StatsDocument,
    pub degradation_vs_normal: Degradation,
}

impl BurstAnalysis {
    pub fn compute(burst: &AggregateStats, main: &AggregateStats) -> Self {
        Self {
            overall: StatsDocument::from(burst),
            degradation_vs_normal: Degradation {
                latency_p95_increase_pct: percent_increase(burst.p95_ms, main.p95_ms),
                latency_p99_increase_pct: percent_increase(burst.p99_ms, main.p99_ms),
                error_rate_increase_pct: burst.error_rate - main.error_rate,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCaseSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub all_passed: bool,
    pub tests: Vec<EdgeCaseResult>,
}

impl From<&EdgeCaseSuite> for EdgeCaseSummary {
    fn from(suite: &EdgeCaseSuite) -> Self {
        let passed = suite.passed_count();
        Self {
            total_tests: suite.results.len(),
            passed,
            failed: suite.results.len() - passed,
            all_passed: suite.passed,
            tests: suite.results.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    /// RFC 3339 start time of report generation
    pub timestamp: String,
    pub duration_seconds: u64,
    pub concurrency: usize,
    pub target_rps: u64,
    pub base_url: String,
    pub seed: u64,
}

/// Contents of `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub test_info: TestInfo,
    pub health_check: Option<HealthCheckResult>,
    pub edge_case_tests: Option<EdgeCaseSummary>,
    pub overall: StatsDocument,
    pub by_algorithm: BTreeMap<String, StatsDocument>,
    pub by_endpoint: BTreeMap<String, StatsDocument>,
    pub by_algorithm_and_endpoint: BTreeMap<String, BTreeMap<String, StatsDocument>>,
    pub burst_test: Option<BurstAnalysis>,
    pub benchmark_results: Option<RemoteResults>,
    pub performance_results: Option<RemoteResults>,
    /// Spike buckets per timeline document (`overall`, `burst`, or algorithm)
    #[serde(default)]
    pub timeline_spikes: BTreeMap<String, Vec<Spike>>,
}

/// Everything a finished run hands to the report
pub struct RunArtifacts<'a> {
    pub config: &'a RunConfig,
    pub main: &'a PhaseResult,
    pub burst: Option<&'a PhaseResult>,
    pub health: Option<&'a HealthCheckResult>,
    pub edge_cases: Option<&'a EdgeCaseSuite>,
    pub benchmarks: Option<&'a RemoteResults>,
    pub regressions: Option<&'a RemoteResults>,
    pub live: &'a LiveMetrics,
}

fn stats_by<'a>(
    groups: BTreeMap<&'a str, Vec<&'a RequestOutcome>>,
    elapsed: f64,
) -> BTreeMap<String, StatsDocument> {
    groups
        .into_iter()
        .map(|(name, outcomes)| (name.to_string(), StatsDocument::from(&aggregate(outcomes, elapsed))))
        .collect()
}

fn algorithm_timelines(log: &OutcomeLog) -> BTreeMap<String, Timeline> {
    log.by_algorithm()
        .into_iter()
        .map(|(algorithm, outcomes)| (algorithm.to_string(), Timeline::build(outcomes)))
        .collect()
}

impl Summary {
    pub fn build(run: &RunArtifacts<'_>) -> Self {
        let log = &run.main.log;
        let elapsed = run.main.elapsed_secs() as f64;
        let overall = aggregate(log, elapsed);

        let by_algorithm_and_endpoint = log
            .by_algorithm_and_endpoint()
            .into_iter()
            .map(|(algorithm, endpoints)| (algorithm.to_string(), stats_by(endpoints, elapsed)))
            .collect();

        let burst_test = run.burst.map(|burst| {
            let burst_stats = aggregate(&burst.log, burst.elapsed_secs() as f64);
            BurstAnalysis::compute(&burst_stats, &overall)
        });

        let mut timeline_spikes = BTreeMap::new();
        timeline_spikes.insert("overall".to_string(), Timeline::build(log).spikes());
        for (algorithm, timeline) in algorithm_timelines(log) {
            timeline_spikes.insert(algorithm, timeline.spikes());
        }
        if let Some(burst) = run.burst {
            timeline_spikes.insert("burst".to_string(), Timeline::build(&burst.log).spikes());
        }

        Self {
            test_info: TestInfo {
                timestamp: chrono::Utc::now().to_rfc3339(),
                duration_seconds: run.main.elapsed_secs(),
                concurrency: run.config.concurrency,
                target_rps: run.config.target_rps,
                base_url: run.config.base_url().to_string(),
                seed: run.config.seed,
            },
            health_check: run.health.cloned(),
            edge_case_tests: run.edge_cases.map(EdgeCaseSummary::from),
            overall: StatsDocument::from(&overall),
            by_algorithm: stats_by(log.by_algorithm(), elapsed),
            by_endpoint: stats_by(log.by_endpoint(), elapsed),
            by_algorithm_and_endpoint,
            burst_test,
            benchmark_results: run.benchmarks.cloned(),
            performance_results: run.regressions.cloned(),
            timeline_spikes,
        }
    }
}

// ============================================================================
// ARTIFACTS
// ============================================================================

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// One line of `raw_metrics.csv`
#[derive(Serialize)]
struct RawRow<'a> {
    timestamp_ms: i64,
    latency_ms: String,
    status_code: u16,
    allowed: Option<bool>,
    error: Option<&'a str>,
    key: &'a str,
    endpoint: &'a str,
    algorithm: &'a str,
    tokens: u32,
    remaining_tokens: Option<i64>,
    retry_after: Option<i64>,
}

/// Dump every outcome to CSV
pub fn write_raw_csv(path: &Path, log: &OutcomeLog) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for o in log {
        writer.serialize(RawRow {
            timestamp_ms: o.timestamp_ms,
            latency_ms: format!("{:.3}", o.latency_ms),
            status_code: o.status_code,
            allowed: o.allowed(),
            error: o.error.as_deref(),
            key: &o.key,
            endpoint: &o.endpoint,
            algorithm: &o.algorithm,
            tokens: o.tokens,
            remaining_tokens: o.remaining_tokens,
            retry_after: o.retry_after,
        })?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", log.len(), path.display());
    Ok(())
}

/// Write every artifact into `dir` (created if needed); returns the paths written
pub fn write_artifacts(dir: &Path, run: &RunArtifacts<'_>, summary: &Summary) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let path = dir.join("summary.json");
    write_json(&path, summary)?;
    written.push(path);

    let path = dir.join("timeline.json");
    write_json(&path, &Timeline::build(&run.main.log))?;
    written.push(path);

    for (algorithm, timeline) in algorithm_timelines(&run.main.log) {
        let path = dir.join(format!("timeline_{}.json", algorithm.to_lowercase()));
        write_json(&path, &timeline)?;
        written.push(path);
    }

    if let Some(burst) = run.burst {
        let path = dir.join("timeline_burst.json");
        write_json(&path, &Timeline::build(&burst.log))?;
        written.push(path);
    }

    if run.config.raw_csv {
        let path = dir.join("raw_metrics.csv");
        write_raw_csv(&path, &run.main.log)?;
        written.push(path);
    }

    let path = dir.join("metrics.prom");
    fs::write(&path, run.live.encode_text()?)?;
    info!("Wrote {}", path.display());
    written.push(path);

    Ok(written)
}

// ============================================================================
// CONSOLE
// ============================================================================

fn share(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn print_group(title: &str, groups: &BTreeMap<String, StatsDocument>, with_verdicts: bool) {
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ {:<60} ║", title);
    for (name, s) in groups {
        println!("╟──────────────────────────────────────────────────────────────╢");
        println!("║ {:<60} ║", name);
        println!("║   Requests:        {:>12}                              ║", s.total_requests);
        if with_verdicts {
            println!("║   Allowed:         {:>12}                              ║", s.allowed);
            println!("║   Denied:          {:>12}                              ║", s.denied);
        }
        println!("║   Errors:          {:>12}                              ║", s.errors);
        println!("║   RPS:             {:>12.2}                              ║", s.rps);
        println!("║   Avg latency:     {:>12.3} ms                           ║", s.latency_ms.avg);
        println!("║   P95 latency:     {:>12.3} ms                           ║", s.latency_ms.p95);
        println!("║   P99 latency:     {:>12.3} ms                           ║", s.latency_ms.p99);
    }
}

impl Summary {
    pub fn print_report(&self) {
        let o = &self.overall;
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║               RATE LIMITER LOAD TEST RESULTS                 ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Duration:          {:>12} seconds                      ║", self.test_info.duration_seconds);
        println!("║ Total Requests:    {:>12}                              ║", o.total_requests);
        println!(
            "║ Allowed:           {:>12} ({:>5.1}%)                     ║",
            o.allowed,
            share(o.allowed, o.total_requests)
        );
        println!(
            "║ Denied:            {:>12} ({:>5.1}%)                     ║",
            o.denied,
            share(o.denied, o.total_requests)
        );
        println!("║ Errors:            {:>12} ({:>5.2}%)                     ║", o.errors, o.error_rate_percent);
        println!("║ Throughput:        {:>12.2} req/s                        ║", o.rps);
        println!("║ Success Rate:      {:>12.2}%                             ║", o.success_rate_percent);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ LATENCY (milliseconds)                                       ║");
        println!("║   min:             {:>12.3}                              ║", o.latency_ms.min);
        println!("║   avg:             {:>12.3}                              ║", o.latency_ms.avg);
        println!("║   median:          {:>12.3}                              ║", o.latency_ms.median);
        println!("║   p95:             {:>12.3}                              ║", o.latency_ms.p95);
        println!("║   p99:             {:>12.3}                              ║", o.latency_ms.p99);
        println!("║   p99.9:           {:>12.3}                              ║", o.latency_ms.p999);
        println!("║   max:             {:>12.3}                              ║", o.latency_ms.max);
        println!("║   std dev:         {:>12.3}                              ║", o.latency_ms.std_dev);

        print_group("BY ALGORITHM", &self.by_algorithm, true);
        print_group("BY ENDPOINT", &self.by_endpoint, false);

        if let Some(edge) = &self.edge_case_tests {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ EDGE CASES: {:>2}/{:<2} passed                                    ║", edge.passed, edge.total_tests);
            for test in &edge.tests {
                let status = if test.passed { "✅" } else { "❌" };
                println!("║   {} {:<56} ║", status, test.test_name);
            }
        }

        if let Some(burst) = &self.burst_test {
            let d = &burst.degradation_vs_normal;
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ BURST TEST                                                   ║");
            println!("║   Requests:        {:>12}                              ║", burst.overall.total_requests);
            println!("║   Error Rate:      {:>12.2}%                             ║", burst.overall.error_rate_percent);
            println!("║   P95 latency:     {:>12.3} ms                           ║", burst.overall.latency_ms.p95);
            println!("║   P99 latency:     {:>12.3} ms                           ║", burst.overall.latency_ms.p99);
            println!("║   P95 increase:    {:>+12.1}%                             ║", d.latency_p95_increase_pct);
            println!("║   P99 increase:    {:>+12.1}%                             ║", d.latency_p99_increase_pct);
            println!("║   Error rate Δ:    {:>+12.2}%                             ║", d.error_rate_increase_pct);
        }

        if let Some(regressions) = &self.performance_results {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ PERFORMANCE REGRESSION                                       ║");
            for (algorithm, result) in regressions {
                let status = RegressionStatus::of(result);
                println!("║   {} {:<30} {:<25} ║", status.symbol(), algorithm, status.to_string());
            }
            for (status, count) in regression_counts(regressions) {
                println!("║   {:<40} {:>17} ║", status, count);
            }
        }

        let spikes: usize = self.timeline_spikes.values().map(Vec::len).sum();
        if spikes > 0 {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ Latency spikes (P99 > 2x mean): {:>10}                   ║", spikes);
        }

        println!("╚══════════════════════════════════════════════════════════════╝\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::tests::outcome;
    use crate::outcome::Verdict;
    use std::time::Duration;

    fn phase(outcomes: Vec<RequestOutcome>, secs: u64) -> PhaseResult {
        PhaseResult {
            log: OutcomeLog::from(outcomes),
            elapsed: Duration::from_secs(secs),
        }
    }

    fn main_phase() -> PhaseResult {
        phase(
            vec![
                outcome(1_000, 2.0, Verdict::Allowed, None, "TOKEN_BUCKET", "rate_limit_check"),
                outcome(1_500, 4.0, Verdict::Denied, None, "TOKEN_BUCKET", "rate_limit_check"),
                outcome(2_000, 3.0, Verdict::Unknown, None, "FIXED_WINDOW", "admin_stats"),
                outcome(2_500, 0.0, Verdict::Unknown, Some("timeout"), "FIXED_WINDOW", "metrics"),
            ],
            2,
        )
    }

    #[test]
    fn test_stats_document_rounding() {
        let stats = AggregateStats {
            rps: 12.3456,
            p99_ms: 1.23456,
            success_rate: 99.999,
            ..Default::default()
        };
        let doc = StatsDocument::from(&stats);
        assert_eq!(doc.rps, 12.35);
        assert_eq!(doc.latency_ms.p99, 1.235);
        assert_eq!(doc.success_rate_percent, 100.0);

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["latency_ms"]["p999"].is_number());
        assert!(json["total_requests"].is_number());
    }

    #[test]
    fn test_burst_degradation() {
        let main = AggregateStats {
            p95_ms: 10.0,
            p99_ms: 0.0,
            error_rate: 1.0,
            ..Default::default()
        };
        let burst = AggregateStats {
            p95_ms: 15.0,
            p99_ms: 30.0,
            error_rate: 3.5,
            ..Default::default()
        };
        let d = BurstAnalysis::compute(&burst, &main).degradation_vs_normal;
        assert_eq!(d.latency_p95_increase_pct, 50.0);
        assert_eq!(d.latency_p99_increase_pct, 0.0);
        assert_eq!(d.error_rate_increase_pct, 2.5);
    }

    #[test]
    fn test_summary_groups() {
        let config = RunConfig::default();
        let main = main_phase();
        let live = LiveMetrics::new().unwrap();
        let run = RunArtifacts {
            config: &config,
            main: &main,
            burst: None,
            health: None,
            edge_cases: None,
            benchmarks: None,
            regressions: None,
            live: &live,
        };
        let summary = Summary::build(&run);

        assert_eq!(summary.overall.total_requests, 4);
        assert_eq!(summary.overall.errors, 1);
        assert_eq!(summary.by_algorithm["TOKEN_BUCKET"].denied, 1);
        assert_eq!(summary.by_endpoint.len(), 3);
        assert_eq!(
            summary.by_algorithm_and_endpoint["FIXED_WINDOW"]["metrics"].errors,
            1
        );
        assert!(summary.burst_test.is_none());
        assert!(summary.timeline_spikes.contains_key("overall"));
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");
        let config = RunConfig {
            raw_csv: true,
            ..RunConfig::default()
        };
        let main = main_phase();
        let burst = phase(
            vec![outcome(9_000, 8.0, Verdict::Allowed, None, "TOKEN_BUCKET", "rate_limit_check")],
            1,
        );
        let live = LiveMetrics::new().unwrap();
        let run = RunArtifacts {
            config: &config,
            main: &main,
            burst: Some(&burst),
            health: None,
            edge_cases: None,
            benchmarks: None,
            regressions: None,
            live: &live,
        };
        let summary = Summary::build(&run);
        let written = write_artifacts(&out, &run, &summary).unwrap();

        for name in [
            "summary.json",
            "timeline.json",
            "timeline_token_bucket.json",
            "timeline_fixed_window.json",
            "timeline_burst.json",
            "raw_metrics.csv",
            "metrics.prom",
        ] {
            assert!(out.join(name).exists(), "missing {name}");
        }
        assert_eq!(written.len(), 7);

        let reloaded: Summary =
            serde_json::from_str(&fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(reloaded.overall, summary.overall);

        let csv = fs::read_to_string(out.join("raw_metrics.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp_ms,latency_ms,status_code,allowed,error,key,endpoint,algorithm,tokens,remaining_tokens,retry_after"
        );
        assert_eq!(csv.lines().count(), 5);
        assert!(csv.contains(",timeout,"));
    }
}
