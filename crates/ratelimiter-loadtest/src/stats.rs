//! Aggregate statistics over recorded outcomes
//!
//! Percentiles use nearest-rank selection on latencies sorted ascending:
//! `P(f)` is the value at zero-based index `floor((n - 1) * f)`. Only
//! outcomes without an error contribute latency samples.

use serde::{Deserialize, Serialize};

use crate::outcome::{RequestOutcome, Verdict};

/// Derived statistics for a set of outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    pub errors: usize,
    /// Requests per second over the supplied elapsed time
    pub rps: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub median_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub std_dev_ms: f64,
    /// Percentage of requests without an error
    pub success_rate: f64,
    /// Percentage of requests with an error
    pub error_rate: f64,
}

/// Nearest-rank percentile of an ascending slice; 0 for an empty slice
pub fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * fraction).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Median of an ascending slice (mean of the middle pair for even lengths)
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Sample standard deviation; 0 with fewer than two samples
fn std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Compute statistics over `outcomes`.
///
/// Pure: the input is only read. `rps` divides by `max(elapsed_secs, 1)`.
pub fn aggregate<'a, I>(outcomes: I, elapsed_secs: f64) -> AggregateStats
where
    I: IntoIterator<Item = &'a RequestOutcome>,
{
    let mut total = 0;
    let mut allowed = 0;
    let mut denied = 0;
    let mut errors = 0;
    let mut latencies = Vec::new();

    for outcome in outcomes {
        total += 1;
        match outcome.verdict {
            Verdict::Allowed => allowed += 1,
            Verdict::Denied => denied += 1,
            Verdict::Unknown => {}
        }
        if outcome.is_error() {
            errors += 1;
        } else {
            latencies.push(outcome.latency_ms);
        }
    }

    if total == 0 {
        return AggregateStats::default();
    }

    latencies.sort_by(|a, b| a.total_cmp(b));

    let (min_ms, max_ms, avg_ms) = match (latencies.first(), latencies.last()) {
        (Some(&min), Some(&max)) => (
            min,
            max,
            latencies.iter().sum::<f64>() / latencies.len() as f64,
        ),
        _ => (0.0, 0.0, 0.0),
    };

    AggregateStats {
        total,
        allowed,
        denied,
        errors,
        rps: total as f64 / elapsed_secs.max(1.0),
        min_ms,
        max_ms,
        avg_ms,
        median_ms: median(&latencies),
        p50_ms: percentile(&latencies, 0.50),
        p75_ms: percentile(&latencies, 0.75),
        p90_ms: percentile(&latencies, 0.90),
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        p999_ms: percentile(&latencies, 0.999),
        std_dev_ms: std_dev(&latencies, avg_ms),
        success_rate: (total - errors) as f64 / total as f64 * 100.0,
        error_rate: errors as f64 / total as f64 * 100.0,
    }
}

/// Relative increase of `value` over `baseline` in percent; 0 for a zero baseline
pub fn percent_increase(value: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        (value - baseline) / baseline * 100.0
    } else {
        0.0
    }
}
