//! Per-second timeline
//!
//! Outcomes are bucketed by `timestamp_ms / 1000` and each bucket is
//! aggregated as if it covered exactly one second.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outcome::RequestOutcome;
use crate::stats::aggregate;

/// Compact statistics for one second of traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub requests: usize,
    pub rps: f64,
    pub allowed: usize,
    pub denied: usize,
    pub errors: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_ms: f64,
}

/// Ordered mapping of Unix second to bucket statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    buckets: BTreeMap<i64, TimelineBucket>,
}

/// A bucket flagged as a latency spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub second: i64,
    pub p99_ms: f64,
    /// Mean bucket P99 the spike was compared against
    pub baseline_p99_ms: f64,
}

impl Timeline {
    /// Bucket `outcomes` into one-second windows
    pub fn build<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a RequestOutcome>,
    {
        let mut grouped: BTreeMap<i64, Vec<&RequestOutcome>> = BTreeMap::new();
        for outcome in outcomes {
            grouped
                .entry(outcome.timestamp_ms.div_euclid(1000))
                .or_default()
                .push(outcome);
        }

        let buckets = grouped
            .into_iter()
            .map(|(second, bucket)| {
                let stats = aggregate(bucket, 1.0);
                (
                    second,
                    TimelineBucket {
                        requests: stats.total,
                        rps: stats.rps,
                        allowed: stats.allowed,
                        denied: stats.denied,
                        errors: stats.errors,
                        p50_ms: stats.p50_ms,
                        p95_ms: stats.p95_ms,
                        p99_ms: stats.p99_ms,
                        avg_ms: stats.avg_ms,
                    },
                )
            })
            .collect();

        Self { buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &TimelineBucket)> {
        self.buckets.iter()
    }

    pub fn get(&self, second: i64) -> Option<&TimelineBucket> {
        self.buckets.get(&second)
    }

    /// Total outcomes across all buckets
    pub fn total_requests(&self) -> usize {
        self.buckets.values().map(|b| b.requests).sum()
    }

    /// Mean of the bucket P99 values; 0 for an empty timeline
    pub fn mean_p99(&self) -> f64 {
        if self.buckets.is_empty() {
            return 0.0;
        }
        self.buckets.values().map(|b| b.p99_ms).sum::<f64>() / self.buckets.len() as f64
    }

    /// Buckets whose P99 exceeds twice the mean bucket P99
    pub fn spikes(&self) -> Vec<Spike> {
        let baseline = self.mean_p99();
        if baseline <= 0.0 {
            return Vec::new();
        }
        self.buckets
            .iter()
            .filter(|(_, b)| b.p99_ms > 2.0 * baseline)
            .map(|(&second, b)| Spike {
                second,
                p99_ms: b.p99_ms,
                baseline_p99_ms: baseline,
            })
            .collect()
    }
}
