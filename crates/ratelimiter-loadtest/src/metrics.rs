//! Live run metrics
//!
//! Updated by the outcome collector while a phase runs. The HDR histogram
//! gives cheap approximate percentiles for progress lines; exact report
//! statistics are always recomputed from the outcome log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{LoadTestError, Result};
use crate::outcome::RequestOutcome;

/// Progress snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p99_ms: f64,
}

/// Prometheus counters plus one latency histogram (microseconds) per phase
pub struct LiveMetrics {
    registry: Registry,
    requests: IntCounterVec,
    /// Empty histogram cloned for each new phase
    blank_histogram: Histogram<u64>,
    latency_histograms: RwLock<HashMap<String, Histogram<u64>>>,
}

impl LiveMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new(
                "loadtest_requests_total",
                "Requests issued against the rate limiter",
            ),
            &["phase", "algorithm", "endpoint", "outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        // 1µs to 1h
        let blank_histogram = Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .map_err(|e| LoadTestError::Histogram(e.to_string()))?;

        Ok(Self {
            registry,
            requests,
            blank_histogram,
            latency_histograms: RwLock::new(HashMap::new()),
        })
    }

    /// Record one outcome
    pub fn observe(&self, phase: &str, outcome: &RequestOutcome) {
        let label = if outcome.is_error() {
            "error"
        } else {
            outcome.verdict.as_str()
        };
        self.requests
            .with_label_values(&[
                phase,
                outcome.algorithm.as_str(),
                outcome.endpoint.as_str(),
                label,
            ])
            .inc();

        if !outcome.is_error() {
            let micros = (outcome.latency_ms * 1000.0).round().max(1.0) as u64;
            self.latency_histograms
                .write()
                .entry(phase.to_string())
                .or_insert_with(|| self.blank_histogram.clone())
                .saturating_record(micros);
        }
    }

    /// Counts and approximate percentiles of one phase
    pub fn snapshot(&self, phase: &str) -> LiveSnapshot {
        let mut requests = 0;
        let mut errors = 0;
        for family in self.registry.gather() {
            for metric in family.get_metric() {
                let labels = metric.get_label();
                let label_is = |name: &str, value: &str| {
                    labels
                        .iter()
                        .any(|l| l.get_name() == name && l.get_value() == value)
                };
                if !label_is("phase", phase) {
                    continue;
                }
                let value = metric.get_counter().get_value() as u64;
                requests += value;
                if label_is("outcome", "error") {
                    errors += value;
                }
            }
        }

        let histograms = self.latency_histograms.read();
        let (p50_ms, p99_ms) = match histograms.get(phase) {
            Some(hist) if hist.len() > 0 => (
                hist.value_at_quantile(0.50) as f64 / 1000.0,
                hist.value_at_quantile(0.99) as f64 / 1000.0,
            ),
            _ => (0.0, 0.0),
        };

        LiveSnapshot {
            requests,
            errors,
            p50_ms,
            p99_ms,
        }
    }

    /// Prometheus text exposition of all counters
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Log a progress line every `every` until the returned handle is aborted
pub fn spawn_progress_logger(metrics: Arc<LiveMetrics>, phase: &str, every: Duration) -> JoinHandle<()> {
    let phase = phase.to_string();
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snap = metrics.snapshot(&phase);
            info!(
                "[{}] {:>4}s elapsed: {} requests, {} errors, p50~{:.2}ms, p99~{:.2}ms",
                phase,
                started.elapsed().as_secs(),
                snap.requests,
                snap.errors,
                snap.p50_ms,
                snap.p99_ms
            );
        }
    })
}
