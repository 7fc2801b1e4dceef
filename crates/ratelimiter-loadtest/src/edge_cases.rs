//! Edge-case scenarios
//!
//! Each scenario configures its own freshly named key, issues a fixed
//! sequence of check requests over its own connection and compares the
//! verdicts against the configured limits. Allow/deny counts are judged
//! within [`ToleranceBands`], since the service's per-key accounting is not
//! guaranteed to be strictly atomic.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{RequestSpec, ServiceClient};
use crate::config::{AlgorithmConfig, EdgeCaseSettings, EndpointKind, ToleranceBands};
use crate::error::Result;
use crate::setup::configure_key;
use crate::wire::{classify_check, CheckVerdict};

const PROBE_CLIENT_IP: &str = "127.0.0.1";

/// Outcome of one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCaseResult {
    pub test_name: String,
    pub passed: bool,
    pub expected_allowed: u32,
    pub expected_denied: u32,
    pub actual_allowed: u32,
    pub actual_denied: u32,
    pub issues: Vec<String>,
    pub details: serde_json::Value,
}

/// Everything a scenario needs; scenarios never read global state
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Algorithm the scenario keys are configured with
    pub algorithm: AlgorithmConfig,
    pub settings: EdgeCaseSettings,
    pub tolerances: ToleranceBands,
}

impl ScenarioContext {
    fn client(&self) -> Result<ServiceClient> {
        ServiceClient::new(&self.base_url, self.request_timeout)
    }

    /// Limits with refill effectively disabled for the scenario's duration
    fn frozen_limits(&self, capacity: u32) -> AlgorithmConfig {
        AlgorithmConfig::new(
            &self.algorithm.name,
            capacity,
            self.settings.disabled_refill_rate,
            self.settings.disabled_refill_period_secs,
        )
    }
}

/// A scripted correctness check against the live service
#[async_trait]
pub trait EdgeCaseScenario: Send + Sync {
    /// Human-readable name used in reports
    fn name(&self) -> &'static str;

    /// Short tag embedded in the scenario's key
    fn slug(&self) -> &'static str;

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport;

    /// Open a session on a fresh key and run the scenario
    async fn run(&self, ctx: &ScenarioContext) -> EdgeCaseResult {
        info!("Running edge case: {}", self.name());
        let report = match Session::open(ctx, self.slug()) {
            Ok(session) => self.execute(ctx, &session).await,
            Err(e) => ScenarioReport::failed(format!("Could not create client: {e}")),
        };
        let result = report.into_result(self.name());
        info!(
            "{}: allowed={}, denied={} -> {}",
            result.test_name,
            result.actual_allowed,
            result.actual_denied,
            if result.passed { "PASS" } else { "FAIL" }
        );
        result
    }
}

/// Result body filled in by a scenario; the name and verdict are added later
#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub expected_allowed: u32,
    pub expected_denied: u32,
    pub actual_allowed: u32,
    pub actual_denied: u32,
    pub issues: Vec<String>,
    pub details: serde_json::Value,
}

impl ScenarioReport {
    fn failed(issue: String) -> Self {
        Self {
            issues: vec![issue],
            ..Default::default()
        }
    }

    fn into_result(self, name: &str) -> EdgeCaseResult {
        EdgeCaseResult {
            test_name: name.to_string(),
            passed: self.issues.is_empty(),
            expected_allowed: self.expected_allowed,
            expected_denied: self.expected_denied,
            actual_allowed: self.actual_allowed,
            actual_denied: self.actual_denied,
            issues: self.issues,
            details: self.details,
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// One scenario's connection and key
pub struct Session {
    client: ServiceClient,
    key: String,
    algorithm: AlgorithmConfig,
}

/// Result of one probe request
#[derive(Debug, Clone)]
pub enum Probe {
    Verdict { status: u16, verdict: CheckVerdict },
    Failed(String),
}

impl Probe {
    pub fn allowed(&self) -> Option<bool> {
        match self {
            Self::Verdict { verdict, .. } => Some(verdict.allowed),
            Self::Failed(_) => None,
        }
    }
}

impl Session {
    fn open(ctx: &ScenarioContext, slug: &str) -> Result<Self> {
        Ok(Self {
            client: ctx.client()?,
            key: format!("edgecase:{}:{}", slug, Uuid::new_v4().simple()),
            algorithm: ctx.algorithm.clone(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Apply limits to this session's key. Rejections are logged and the
    /// scenario proceeds against whatever limits the service holds.
    pub async fn configure(&self, limits: &AlgorithmConfig) {
        if let Err(e) = configure_key(&self.client, &self.key, limits).await {
            warn!("Edge case key {} not configured: {}", self.key, e);
        }
    }

    /// Issue one single-token check
    pub async fn probe(&self) -> Probe {
        let request = RequestSpec::for_endpoint(
            EndpointKind::RateLimitCheck,
            &self.key,
            1,
            PROBE_CLIENT_IP,
            &self.algorithm.name,
            &self.algorithm,
        );
        match self.client.execute(&request).await {
            Ok(exchange) => match classify_check(&exchange) {
                Ok(verdict) => Probe::Verdict {
                    status: exchange.status,
                    verdict,
                },
                Err(e) => Probe::Failed(e.to_string()),
            },
            Err(e) => Probe::Failed(e.to_string()),
        }
    }

    /// Issue `count` back-to-back checks
    pub async fn probe_many(&self, count: u32) -> Vec<Probe> {
        let mut probes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            probes.push(self.probe().await);
        }
        probes
    }
}

/// Allowed, denied and failed counts over a probe sequence
fn tally(probes: &[Probe]) -> (u32, u32, u32) {
    probes.iter().fold((0, 0, 0), |(a, d, e), p| match p.allowed() {
        Some(true) => (a + 1, d, e),
        Some(false) => (a, d + 1, e),
        None => (a, d, e + 1),
    })
}

fn failure_issues(probes: &[Probe]) -> Vec<String> {
    probes
        .iter()
        .enumerate()
        .filter_map(|(i, p)| match p {
            Probe::Failed(e) => Some(format!("Request {i} failed: {e}")),
            Probe::Verdict { .. } => None,
        })
        .collect()
}

fn probe_log(probes: &[Probe]) -> serde_json::Value {
    probes
        .iter()
        .enumerate()
        .map(|(i, p)| match p {
            Probe::Verdict { status, verdict } => json!({
                "req": i,
                "status": status,
                "allowed": verdict.allowed,
                "remaining": verdict.remaining_tokens,
            }),
            Probe::Failed(e) => json!({"req": i, "error": e}),
        })
        .collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Capacity `C` with refill disabled; `C + 5` requests
pub struct ExhaustBucket;

#[async_trait]
impl EdgeCaseScenario for ExhaustBucket {
    fn name(&self) -> &'static str {
        "Exhaust Bucket Test"
    }

    fn slug(&self) -> &'static str {
        "exhaust"
    }

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport {
        let capacity = ctx.settings.exhaust_capacity;
        let sent = capacity.saturating_add(5);
        session.configure(&ctx.frozen_limits(capacity)).await;

        let probes = session.probe_many(sent).await;
        let (allowed, denied, errors) = tally(&probes);
        debug!("{} probes: {:?}", session.key(), probe_log(&probes));

        let expected_denied = sent - capacity;
        let allowed_margin = ctx.tolerances.exhaust_allowed_margin;
        let denied_floor = expected_denied.saturating_sub(ctx.tolerances.exhaust_denied_margin);

        let mut issues = Vec::new();
        if allowed + allowed_margin < capacity || allowed > capacity + allowed_margin {
            issues.push(format!("Expected ~{capacity} allowed, got {allowed}"));
        }
        if denied < denied_floor {
            issues.push(format!("Expected at least {denied_floor} denied, got {denied}"));
        }
        if errors > 0 {
            issues.push(format!("Got {errors} errors (HTTP failures)"));
            issues.extend(failure_issues(&probes));
        }

        ScenarioReport {
            expected_allowed: capacity,
            expected_denied,
            actual_allowed: allowed,
            actual_denied: denied,
            issues,
            details: json!({
                "capacity": capacity,
                "requests_sent": sent,
                "errors": errors,
                "responses": probe_log(&probes),
            }),
        }
    }
}

/// Capacity `C`; `2.5 × C` requests with no pacing
pub struct BurstBeyondCapacity;

#[async_trait]
impl EdgeCaseScenario for BurstBeyondCapacity {
    fn name(&self) -> &'static str {
        "Burst Beyond Capacity Test"
    }

    fn slug(&self) -> &'static str {
        "burst"
    }

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport {
        let capacity = ctx.settings.burst_capacity;
        let burst_size = capacity.saturating_mul(5) / 2;
        session.configure(&ctx.frozen_limits(capacity)).await;

        let probes = session.probe_many(burst_size).await;
        let (allowed, denied, _) = tally(&probes);

        let expected_denied = burst_size - capacity;
        let margin = ctx.tolerances.burst_margin;

        let mut issues = failure_issues(&probes);
        if denied < expected_denied.saturating_sub(margin) {
            issues.push(format!("Expected ~{expected_denied} denied, got only {denied}"));
        }
        if allowed > capacity + margin {
            issues.push(format!("Too many allowed: {allowed} (capacity: {capacity})"));
        }

        ScenarioReport {
            expected_allowed: capacity,
            expected_denied,
            actual_allowed: allowed,
            actual_denied: denied,
            issues,
            details: json!({"capacity": capacity, "burst_size": burst_size}),
        }
    }
}

/// Capacity `C` with refill disabled; remaining tokens must never grow
pub struct TokenTracking;

/// Fewest remaining-token samples needed to judge ordering
const MIN_TOKEN_SAMPLES: usize = 3;

#[async_trait]
impl EdgeCaseScenario for TokenTracking {
    fn name(&self) -> &'static str {
        "Token Tracking Test"
    }

    fn slug(&self) -> &'static str {
        "tokens"
    }

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport {
        let capacity = ctx.settings.token_tracking_capacity;
        session.configure(&ctx.frozen_limits(capacity)).await;

        let probes = session.probe_many(capacity).await;
        let remaining: Vec<i64> = probes
            .iter()
            .filter_map(|p| match p {
                Probe::Verdict { verdict, .. } if verdict.allowed => verdict.remaining_tokens,
                _ => None,
            })
            .collect();

        let mut issues = failure_issues(&probes);
        if remaining.len() < MIN_TOKEN_SAMPLES {
            issues.push("Not enough token data collected".to_string());
        } else if remaining.windows(2).any(|w| w[1] > w[0]) {
            issues.push(format!("Tokens not decreasing monotonically: {remaining:?}"));
        }

        ScenarioReport {
            expected_allowed: capacity,
            expected_denied: 0,
            actual_allowed: remaining.len() as u32,
            actual_denied: 0,
            issues,
            details: json!({"remaining_tokens": remaining}),
        }
    }
}

/// Exhaust a small bucket, then every denial must carry a positive retry-after
pub struct RetryAfterPresence;

#[async_trait]
impl EdgeCaseScenario for RetryAfterPresence {
    fn name(&self) -> &'static str {
        "Retry-After Headers Test"
    }

    fn slug(&self) -> &'static str {
        "retry"
    }

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport {
        let capacity = ctx.settings.retry_after_capacity;
        let probes_to_send = ctx.settings.retry_after_probes;
        session.configure(&ctx.frozen_limits(capacity)).await;

        // Drain; verdicts here are not judged
        session.probe_many(capacity).await;

        let probes = session.probe_many(probes_to_send).await;
        let mut denied = 0u32;
        let mut missing = 0u32;
        let mut values = Vec::new();
        for probe in &probes {
            if let Probe::Verdict { verdict, .. } = probe {
                if verdict.allowed {
                    continue;
                }
                denied += 1;
                match verdict.retry_after {
                    Some(v) => values.push(v),
                    None => missing += 1,
                }
            }
        }

        let mut issues = failure_issues(&probes);
        if denied == 0 {
            issues.push("No requests were denied after exhausting the bucket".to_string());
        } else if values.is_empty() {
            issues.push("No retry-after values found on denied requests".to_string());
        } else {
            if missing > 0 {
                issues.push(format!("{missing} denied responses carried no retry-after"));
            }
            if values.iter().any(|&v| v <= 0) {
                issues.push(format!("Invalid retry-after values: {values:?}"));
            }
        }

        ScenarioReport {
            expected_allowed: 0,
            expected_denied: probes_to_send,
            actual_allowed: 0,
            actual_denied: denied,
            issues,
            details: json!({"retry_after_values": values, "denied_count": denied}),
        }
    }
}

/// Exhaust, wait, and expect most of the theoretical refill to be usable
pub struct GradualRefill;

#[async_trait]
impl EdgeCaseScenario for GradualRefill {
    fn name(&self) -> &'static str {
        "Gradual Refill Test"
    }

    fn slug(&self) -> &'static str {
        "refill"
    }

    async fn execute(&self, ctx: &ScenarioContext, session: &Session) -> ScenarioReport {
        let capacity = ctx.settings.refill_capacity;
        let rate = ctx.settings.refill_rate;
        let wait_secs = ctx.settings.refill_wait_secs;
        session
            .configure(&AlgorithmConfig::new(&ctx.algorithm.name, capacity, rate, 1))
            .await;

        let initial = session.probe_many(capacity).await;
        let (allowed_initial, _, _) = tally(&initial);

        info!("Waiting {:.1}s for refill", wait_secs);
        // Unvalidated settings may carry a negative or NaN wait
        let wait = Duration::try_from_secs_f64(wait_secs).unwrap_or_default();
        tokio::time::sleep(wait).await;

        let after = session.probe_many(capacity).await;
        let (allowed_after, denied_after, _) = tally(&after);

        let expected_refilled = ((rate * wait_secs).floor() as u32).min(capacity);
        let floor = expected_refilled as f64 * ctx.tolerances.refill_min_fraction;

        let mut issues = failure_issues(&initial);
        issues.extend(failure_issues(&after));
        if (allowed_after as f64) < floor {
            issues.push(format!(
                "Expected ~{expected_refilled} allowed after refill, got {allowed_after}"
            ));
        }
        if allowed_initial != capacity {
            issues.push(format!(
                "Initial bucket not full: expected {capacity}, got {allowed_initial}"
            ));
        }

        ScenarioReport {
            expected_allowed: expected_refilled,
            expected_denied: 0,
            actual_allowed: allowed_after,
            actual_denied: denied_after,
            issues,
            details: json!({
                "initial_allowed": allowed_initial,
                "after_refill_allowed": allowed_after,
                "refill_rate": rate,
                "wait_time_seconds": wait_secs,
            }),
        }
    }
}

// ============================================================================
// SUITE
// ============================================================================

/// Results of the full suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCaseSuite {
    pub results: Vec<EdgeCaseResult>,
    /// Every scenario passed
    pub passed: bool,
}

impl EdgeCaseSuite {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn print_report(&self) {
        println!("\n═══════════════════════════════════════════════════════════════");
        println!("              EDGE CASE VALIDATION");
        println!("═══════════════════════════════════════════════════════════════");

        for result in &self.results {
            let status = if result.passed { "✅ PASS" } else { "❌ FAIL" };
            println!("\n  {} - {}", result.test_name, status);
            println!(
                "    Allowed:  {} (expected {})",
                result.actual_allowed, result.expected_allowed
            );
            println!(
                "    Denied:   {} (expected {})",
                result.actual_denied, result.expected_denied
            );
            for issue in &result.issues {
                println!("    Issue:    {}", issue);
            }
        }

        println!("\n═══════════════════════════════════════════════════════════════");
        println!("  {}/{} scenarios passed", self.passed_count(), self.results.len());
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}

/// The five scenarios in their canonical order
pub fn default_scenarios() -> Vec<Box<dyn EdgeCaseScenario>> {
    vec![
        Box::new(ExhaustBucket),
        Box::new(BurstBeyondCapacity),
        Box::new(TokenTracking),
        Box::new(RetryAfterPresence),
        Box::new(GradualRefill),
    ]
}

/// Run every scenario; a failing one never stops the rest
pub async fn run_suite(ctx: &ScenarioContext, scenarios: &[Box<dyn EdgeCaseScenario>]) -> EdgeCaseSuite {
    info!(
        "Running {} edge case scenarios with {}",
        scenarios.len(),
        ctx.algorithm.name
    );

    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        results.push(scenario.run(ctx).await);
    }

    let passed = results.iter().all(|r| r.passed);
    let suite = EdgeCaseSuite { results, passed };

    info!(
        "Edge case summary: {}/{} passed",
        suite.passed_count(),
        suite.results.len()
    );
    for result in suite.results.iter().filter(|r| !r.passed) {
        for issue in &result.issues {
            warn!("{}: {}", result.test_name, issue);
        }
    }
    suite
}
