//! Post-test validation
//!
//! The error-rate and health checks always count. Latency checks only count
//! in strict mode; otherwise a breach is reported as a warning.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ValidationThresholds;
use crate::stats::AggregateStats;

/// Result of post-test validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passes: bool,
    pub checks: Vec<ValidationCheck>,
}

/// Individual validation check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    /// Whether a failure of this check fails validation
    pub enforced: bool,
    pub actual: String,
    pub expected: String,
}

impl ValidationReport {
    fn push(&mut self, check: ValidationCheck) {
        if !check.passed {
            if check.enforced {
                self.passes = false;
            } else {
                warn!("{}: {} (threshold {})", check.name, check.actual, check.expected);
            }
        }
        self.checks.push(check);
    }

    /// Failed checks that count against the run
    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| c.enforced && !c.passed)
    }

    /// Record the post-test health re-check; `issue` is `None` when healthy
    pub fn add_health_check(&mut self, issue: Option<String>) {
        self.push(ValidationCheck {
            name: "System health UP after test".to_string(),
            passed: issue.is_none(),
            enforced: true,
            actual: issue.unwrap_or_else(|| "UP".to_string()),
            expected: "UP".to_string(),
        });
    }

    pub fn print_report(&self) {
        println!("\n═══════════════════════════════════════════════════════════════");
        println!("              POST-TEST VALIDATION");
        println!("═══════════════════════════════════════════════════════════════");

        for check in &self.checks {
            let status = match (check.passed, check.enforced) {
                (true, _) => "✅ PASS",
                (false, true) => "❌ FAIL",
                (false, false) => "⚠️  WARN",
            };
            println!("\n  {} - {}", check.name, status);
            println!("    Actual:   {}", check.actual);
            println!("    Expected: {}", check.expected);
        }

        println!("\n═══════════════════════════════════════════════════════════════");
        if self.passes {
            println!("  OVERALL: ✅ ALL VALIDATIONS PASS");
        } else {
            println!("  OVERALL: ❌ SOME VALIDATIONS FAILED");
        }
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}

/// Judge main-phase statistics against the thresholds
pub fn evaluate(stats: &AggregateStats, thresholds: &ValidationThresholds, strict: bool) -> ValidationReport {
    let mut report = ValidationReport {
        passes: true,
        checks: Vec::new(),
    };

    report.push(ValidationCheck {
        name: format!("Error rate <= {}%", thresholds.max_error_rate_percent),
        passed: stats.error_rate <= thresholds.max_error_rate_percent,
        enforced: true,
        actual: format!("{:.2}%", stats.error_rate),
        expected: format!("<={}%", thresholds.max_error_rate_percent),
    });

    report.push(ValidationCheck {
        name: format!("P95 latency <= {}ms", thresholds.max_p95_ms),
        passed: stats.p95_ms <= thresholds.max_p95_ms,
        enforced: strict,
        actual: format!("{:.3}ms", stats.p95_ms),
        expected: format!("<={}ms", thresholds.max_p95_ms),
    });

    report.push(ValidationCheck {
        name: format!("P99 latency <= {}ms", thresholds.max_p99_ms),
        passed: stats.p99_ms <= thresholds.max_p99_ms,
        enforced: strict,
        actual: format!("{:.3}ms", stats.p99_ms),
        expected: format!("<={}ms", thresholds.max_p99_ms),
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(error_rate: f64, p95_ms: f64, p99_ms: f64) -> AggregateStats {
        AggregateStats {
            total: 100,
            error_rate,
            p95_ms,
            p99_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_error_rate_threshold() {
        let thresholds = ValidationThresholds::default();
        assert!(!evaluate(&stats(6.0, 10.0, 20.0), &thresholds, false).passes);
        assert!(evaluate(&stats(3.0, 10.0, 20.0), &thresholds, false).passes);
        assert!(evaluate(&stats(5.0, 10.0, 20.0), &thresholds, true).passes);
    }

    #[test]
    fn test_latency_only_enforced_in_strict_mode() {
        let thresholds = ValidationThresholds::default();
        let slow = stats(0.0, 150.0, 400.0);

        let lenient = evaluate(&slow, &thresholds, false);
        assert!(lenient.passes);
        assert_eq!(lenient.failures().count(), 0);
        assert_eq!(lenient.checks.iter().filter(|c| !c.passed).count(), 2);

        let strict = evaluate(&slow, &thresholds, true);
        assert!(!strict.passes);
        assert_eq!(strict.failures().count(), 2);
    }

    #[test]
    fn test_unhealthy_service_fails_validation() {
        let mut report = evaluate(&stats(0.0, 1.0, 1.0), &ValidationThresholds::default(), false);
        report.add_health_check(Some("Service status is DOWN after test".into()));
        assert!(!report.passes);

        let mut healthy = evaluate(&stats(0.0, 1.0, 1.0), &ValidationThresholds::default(), false);
        healthy.add_health_check(None);
        assert!(healthy.passes);
        assert_eq!(healthy.checks.len(), 4);
    }
}
