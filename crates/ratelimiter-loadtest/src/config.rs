//! Run configuration
//!
//! Everything a run needs is carried in a [`RunConfig`] that is built once
//! (defaults, then an optional TOML file, then CLI overrides) and shared
//! read-only with every phase.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::HttpMethod;
use crate::error::{LoadTestError, Result};

// ============================================================================
// ALGORITHMS
// ============================================================================

/// One rate limiter configuration under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Algorithm name as the service knows it (e.g. `TOKEN_BUCKET`)
    pub name: String,

    /// Bucket capacity
    pub capacity: u32,

    /// Tokens added per refill period
    pub refill_rate: f64,

    /// Refill period in seconds
    pub refill_period_seconds: u64,
}

impl AlgorithmConfig {
    pub fn new(name: &str, capacity: u32, refill_rate: f64, refill_period_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            capacity,
            refill_rate,
            refill_period_seconds,
        }
    }

    /// Key prefix used for every generated key of this algorithm
    pub fn key_prefix(&self) -> String {
        self.name.to_lowercase()
    }

    /// Pattern under which the per-algorithm configuration is registered
    pub fn pattern(&self) -> String {
        format!("{}:*", self.key_prefix())
    }
}

/// The five algorithms supported by the service, with the shared baseline limits
pub fn default_algorithms() -> Vec<AlgorithmConfig> {
    [
        "TOKEN_BUCKET",
        "SLIDING_WINDOW",
        "SLIDING_WINDOW_COUNTER",
        "FIXED_WINDOW",
        "LEAKY_BUCKET",
    ]
    .iter()
    .map(|name| AlgorithmConfig::new(name, 100, 10.0, 1))
    .collect()
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Logical endpoints exercised by synthetic traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    RateLimitCheck,
    GetConfig,
    AdminStats,
    AdminKeys,
    GetPatterns,
    SaveConfig,
    HealthCheck,
    Metrics,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 8] = [
        EndpointKind::RateLimitCheck,
        EndpointKind::GetConfig,
        EndpointKind::AdminStats,
        EndpointKind::AdminKeys,
        EndpointKind::GetPatterns,
        EndpointKind::SaveConfig,
        EndpointKind::HealthCheck,
        EndpointKind::Metrics,
    ];

    /// Logical name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitCheck => "rate_limit_check",
            Self::GetConfig => "get_config",
            Self::AdminStats => "admin_stats",
            Self::AdminKeys => "admin_keys",
            Self::GetPatterns => "get_patterns",
            Self::SaveConfig => "save_config",
            Self::HealthCheck => "health_check",
            Self::Metrics => "metrics",
        }
    }

    pub fn method(&self) -> HttpMethod {
        match self {
            Self::RateLimitCheck | Self::SaveConfig => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    /// Whether responses carry a rate limit verdict
    pub fn is_check(&self) -> bool {
        matches!(self, Self::RateLimitCheck)
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An endpoint and its share of synthetic traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub kind: EndpointKind,
    pub weight: f64,
}

/// Traffic split across endpoints; the check endpoint dominates
pub fn default_endpoints() -> Vec<EndpointSpec> {
    EndpointKind::ALL
        .iter()
        .map(|&kind| EndpointSpec {
            kind,
            weight: match kind {
                EndpointKind::RateLimitCheck => 0.60,
                EndpointKind::GetConfig => 0.10,
                _ => 0.05,
            },
        })
        .collect()
}

// ============================================================================
// THRESHOLDS AND TOLERANCES
// ============================================================================

/// Post-test validation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationThresholds {
    /// Maximum error rate in percent
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate_percent: f64,

    /// Maximum P95 latency in milliseconds
    #[serde(default = "default_max_p95")]
    pub max_p95_ms: f64,

    /// Maximum P99 latency in milliseconds
    #[serde(default = "default_max_p99")]
    pub max_p99_ms: f64,
}

fn default_max_error_rate() -> f64 {
    5.0
}

fn default_max_p95() -> f64 {
    100.0
}

fn default_max_p99() -> f64 {
    200.0
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_error_rate_percent: default_max_error_rate(),
            max_p95_ms: default_max_p95(),
            max_p99_ms: default_max_p99(),
        }
    }
}

/// Margins applied to edge-case allow/deny assertions.
///
/// The service does not document whether per-key accounting is strictly
/// atomic, so off-by-one results are tolerated up to these bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceBands {
    /// Allowed-count margin around capacity in the exhaust scenario
    pub exhaust_allowed_margin: u32,

    /// Denied-count margin in the exhaust scenario
    pub exhaust_denied_margin: u32,

    /// Allow/deny margin in the burst scenario
    pub burst_margin: u32,

    /// Minimum fraction of the theoretical refill that must be observed
    pub refill_min_fraction: f64,
}

impl Default for ToleranceBands {
    fn default() -> Self {
        Self {
            exhaust_allowed_margin: 1,
            exhaust_denied_margin: 1,
            burst_margin: 2,
            refill_min_fraction: 0.70,
        }
    }
}

/// Edge-case scenario parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeCaseSettings {
    pub exhaust_capacity: u32,
    pub burst_capacity: u32,
    pub token_tracking_capacity: u32,
    pub retry_after_capacity: u32,
    /// Requests issued after the retry-after bucket is exhausted
    pub retry_after_probes: u32,
    pub refill_capacity: u32,
    /// Tokens per second for the refill scenario
    pub refill_rate: f64,
    pub refill_wait_secs: f64,
    /// Refill rate standing in for "no refill" (spread over `disabled_refill_period_secs`)
    pub disabled_refill_rate: f64,
    pub disabled_refill_period_secs: u64,
}

impl Default for EdgeCaseSettings {
    fn default() -> Self {
        Self {
            exhaust_capacity: 10,
            burst_capacity: 20,
            token_tracking_capacity: 15,
            retry_after_capacity: 5,
            retry_after_probes: 5,
            refill_capacity: 10,
            refill_rate: 5.0,
            refill_wait_secs: 2.0,
            disabled_refill_rate: 0.001,
            disabled_refill_period_secs: 3600,
        }
    }
}

/// Parameters for the server-side benchmark and regression runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRunSettings {
    pub total_requests: u64,
    pub concurrent_threads: u32,
    pub duration_seconds: u64,
    pub benchmark_timeout_secs: u64,
    pub regression_timeout_secs: u64,
}

impl Default for RemoteRunSettings {
    fn default() -> Self {
        Self {
            total_requests: 10_000,
            concurrent_threads: 50,
            duration_seconds: 60,
            benchmark_timeout_secs: 60,
            regression_timeout_secs: 120,
        }
    }
}

/// Burst phase shape relative to the main phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstSettings {
    pub multiplier: usize,
    pub duration_secs: u64,
}

impl Default for BurstSettings {
    fn default() -> Self {
        Self {
            multiplier: 3,
            duration_secs: 30,
        }
    }
}

/// Optional phases; the main load phase always runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseToggles {
    pub health_checks: bool,
    pub setup: bool,
    pub edge_cases: bool,
    pub burst: bool,
    pub benchmark: bool,
    pub performance: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            health_checks: true,
            setup: true,
            edge_cases: true,
            burst: true,
            benchmark: true,
            performance: true,
        }
    }
}

// ============================================================================
// RUN CONFIGURATION
// ============================================================================

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Service base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Main phase duration in seconds
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Warmup sleep in seconds
    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,

    /// Number of concurrent workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Aggregate target requests per second
    #[serde(default = "default_target_rps")]
    pub target_rps: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Directory receiving the run artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Dump every request to `raw_metrics.csv`
    #[serde(default)]
    pub raw_csv: bool,

    /// Global seed; worker `i` is seeded with `seed + i`
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Escalate validation failures to a non-zero exit
    #[serde(default)]
    pub strict_validation: bool,

    #[serde(default)]
    pub phases: PhaseToggles,

    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<AlgorithmConfig>,

    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointSpec>,

    #[serde(default)]
    pub thresholds: ValidationThresholds,

    #[serde(default)]
    pub tolerances: ToleranceBands,

    #[serde(default)]
    pub edge_cases: EdgeCaseSettings,

    #[serde(default)]
    pub remote: RemoteRunSettings,

    #[serde(default)]
    pub burst: BurstSettings,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_duration() -> u64 {
    180
}

fn default_warmup() -> u64 {
    10
}

fn default_concurrency() -> usize {
    100
}

fn default_target_rps() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/comprehensive_loadtest")
}

fn default_seed() -> u64 {
    42
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            duration_secs: default_duration(),
            warmup_secs: default_warmup(),
            concurrency: default_concurrency(),
            target_rps: default_target_rps(),
            request_timeout_secs: default_request_timeout(),
            output_dir: default_output_dir(),
            raw_csv: false,
            seed: default_seed(),
            strict_validation: false,
            phases: PhaseToggles::default(),
            algorithms: default_algorithms(),
            endpoints: default_endpoints(),
            thresholds: ValidationThresholds::default(),
            tolerances: ToleranceBands::default(),
            edge_cases: EdgeCaseSettings::default(),
            remote: RemoteRunSettings::default(),
            burst: BurstSettings::default(),
        }
    }
}

impl RunConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations no phase can run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(LoadTestError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.algorithms.is_empty() {
            return Err(LoadTestError::InvalidConfig(
                "at least one algorithm must be configured".into(),
            ));
        }
        if self.endpoints.is_empty() {
            return Err(LoadTestError::InvalidConfig(
                "at least one endpoint must be configured".into(),
            ));
        }
        for endpoint in &self.endpoints {
            non_negative(&format!("weight of {}", endpoint.kind), endpoint.weight)?;
        }
        let total: f64 = self.endpoints.iter().map(|e| e.weight).sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(LoadTestError::InvalidConfig(format!(
                "endpoint weights must sum to 1.0 (got {total:.4})"
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LoadTestError::InvalidConfig(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        for algo in &self.algorithms {
            non_negative(&format!("refill rate of {}", algo.name), algo.refill_rate)?;
        }

        let multiplier = self.burst.multiplier;
        if multiplier == 0 {
            return Err(LoadTestError::InvalidConfig(
                "burst multiplier must be at least 1".into(),
            ));
        }
        if self.concurrency.checked_mul(multiplier).is_none()
            || self.target_rps.checked_mul(multiplier as u64).is_none()
        {
            return Err(LoadTestError::InvalidConfig(format!(
                "burst multiplier {multiplier} overflows concurrency or target rate"
            )));
        }

        let thresholds = &self.thresholds;
        non_negative("max_error_rate_percent", thresholds.max_error_rate_percent)?;
        non_negative("max_p95_ms", thresholds.max_p95_ms)?;
        non_negative("max_p99_ms", thresholds.max_p99_ms)?;

        let fraction = self.tolerances.refill_min_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(LoadTestError::InvalidConfig(format!(
                "refill_min_fraction must be within 0.0..=1.0 (got {fraction})"
            )));
        }

        let edge = &self.edge_cases;
        non_negative("edge_cases.refill_rate", edge.refill_rate)?;
        non_negative("edge_cases.refill_wait_secs", edge.refill_wait_secs)?;
        non_negative("edge_cases.disabled_refill_rate", edge.disabled_refill_rate)?;
        for (name, count) in [
            ("exhaust_capacity", edge.exhaust_capacity),
            ("burst_capacity", edge.burst_capacity),
            ("token_tracking_capacity", edge.token_tracking_capacity),
            ("retry_after_capacity", edge.retry_after_capacity),
            ("retry_after_probes", edge.retry_after_probes),
            ("refill_capacity", edge.refill_capacity),
        ] {
            if count > MAX_EDGE_CASE_REQUESTS {
                return Err(LoadTestError::InvalidConfig(format!(
                    "edge_cases.{name} must be at most {MAX_EDGE_CASE_REQUESTS} (got {count})"
                )));
            }
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Find an algorithm by name, falling back to the first configured one
    pub fn resolve_algorithm(&self, name: &str) -> &AlgorithmConfig {
        resolve_algorithm(&self.algorithms, name)
    }

    /// Algorithm used by the edge-case suite
    pub fn primary_algorithm(&self) -> &AlgorithmConfig {
        &self.algorithms[0]
    }
}

/// Upper bound on any request count the edge-case scenarios derive from config
pub const MAX_EDGE_CASE_REQUESTS: u32 = 100_000;

/// Finite and not below zero
fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LoadTestError::InvalidConfig(format!(
            "{name} must be a finite non-negative number (got {value})"
        )))
    }
}

/// Exact name match, else the first entry. `algorithms` must be non-empty.
pub fn resolve_algorithm<'a>(algorithms: &'a [AlgorithmConfig], name: &str) -> &'a AlgorithmConfig {
    algorithms
        .iter()
        .find(|a| a.name == name)
        .unwrap_or(&algorithms[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.algorithms.len(), 5);
        assert_eq!(config.endpoints.len(), 8);
    }

    #[test]
    fn test_endpoint_weights_sum_to_one() {
        let total: f64 = default_endpoints().iter().map(|e| e.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            base_url = "http://ratelimiter:9000"
            concurrency = 8
            strict_validation = true

            [tolerances]
            burst_margin = 4

            [phases]
            burst = false
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://ratelimiter:9000");
        assert_eq!(config.concurrency, 8);
        assert!(config.strict_validation);
        assert_eq!(config.tolerances.burst_margin, 4);
        assert_eq!(config.tolerances.exhaust_allowed_margin, 1);
        assert!(!config.phases.burst);
        assert!(config.phases.edge_cases);
        assert_eq!(config.target_rps, 1000);
        assert_eq!(config.algorithms.len(), 5);
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut config = RunConfig::default();
        config.endpoints[0].weight = 0.9;
        assert!(matches!(
            config.validate(),
            Err(LoadTestError::InvalidConfig(_))
        ));
    }

    fn assert_invalid(config: &RunConfig) {
        assert!(
            matches!(config.validate(), Err(LoadTestError::InvalidConfig(_))),
            "expected InvalidConfig"
        );
    }

    #[test]
    fn test_rejects_negative_refill_wait() {
        let err = RunConfig::from_toml_str("[edge_cases]\nrefill_wait_secs = -1.0\n").unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_non_finite_durations_and_rates() {
        let mut config = RunConfig::default();
        config.edge_cases.refill_wait_secs = f64::NAN;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.edge_cases.refill_rate = f64::INFINITY;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.edge_cases.disabled_refill_rate = -0.5;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.algorithms[1].refill_rate = f64::NAN;
        assert_invalid(&config);
    }

    #[test]
    fn test_rejects_nan_weight() {
        let mut config = RunConfig::default();
        config.endpoints[0].weight = f64::NAN;
        assert_invalid(&config);
    }

    #[test]
    fn test_rejects_bad_burst_multiplier() {
        let mut config = RunConfig::default();
        config.burst.multiplier = 0;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.concurrency = usize::MAX / 2;
        config.burst.multiplier = 3;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.target_rps = u64::MAX / 2;
        config.burst.multiplier = 3;
        assert_invalid(&config);
    }

    #[test]
    fn test_rejects_bad_tolerances_and_thresholds() {
        let mut config = RunConfig::default();
        config.tolerances.refill_min_fraction = 1.5;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.tolerances.refill_min_fraction = f64::NAN;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.thresholds.max_p99_ms = f64::NAN;
        assert_invalid(&config);
    }

    #[test]
    fn test_rejects_oversized_edge_case_counts() {
        let mut config = RunConfig::default();
        config.edge_cases.burst_capacity = u32::MAX;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.edge_cases.retry_after_probes = MAX_EDGE_CASE_REQUESTS + 1;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.edge_cases.exhaust_capacity = MAX_EDGE_CASE_REQUESTS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = RunConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_algorithm_fallback() {
        let algorithms = default_algorithms();
        assert_eq!(resolve_algorithm(&algorithms, "FIXED_WINDOW").name, "FIXED_WINDOW");
        assert_eq!(resolve_algorithm(&algorithms, "GCRA").name, "TOKEN_BUCKET");
    }

    #[test]
    fn test_pattern() {
        let algo = AlgorithmConfig::new("SLIDING_WINDOW", 100, 10.0, 1);
        assert_eq!(algo.pattern(), "sliding_window:*");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = RunConfig {
            base_url: "http://localhost:8080/".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://localhost:8080");
    }
}
