//! Per-request outcomes and the append-only outcome log
//!
//! Workers never share a lock: each holds an [`OutcomeSink`] and sends its
//! outcomes to a single collector task, which owns the log and is joined
//! once every worker has finished.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::metrics::LiveMetrics;

/// Rate limiter verdict for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allowed,
    Denied,
    /// No verdict: non-check endpoint or failed request
    Unknown,
}

impl Verdict {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
        }
    }
}

/// One completed or failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Wall-clock send time in Unix milliseconds
    pub timestamp_ms: i64,
    pub latency_ms: f64,
    /// 0 when no response was received
    pub status_code: u16,
    pub verdict: Verdict,
    pub error: Option<String>,
    pub key: String,
    pub endpoint: String,
    pub algorithm: String,
    pub tokens: u32,
    pub remaining_tokens: Option<i64>,
    pub retry_after: Option<i64>,
}

impl RequestOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Tri-state as an optional bool, the shape used in the CSV dump
    pub fn allowed(&self) -> Option<bool> {
        match self.verdict {
            Verdict::Allowed => Some(true),
            Verdict::Denied => Some(false),
            Verdict::Unknown => None,
        }
    }
}

// ============================================================================
// COLLECTION
// ============================================================================

/// Sending half held by each worker
#[derive(Clone)]
pub struct OutcomeSink {
    tx: mpsc::UnboundedSender<RequestOutcome>,
}

impl OutcomeSink {
    /// Append an outcome. Never blocks; a closed collector drops the record.
    pub fn record(&self, outcome: RequestOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::warn!("Outcome collector closed, dropping outcome");
        }
    }
}

/// Collector task owning the log until all sinks are dropped
pub struct OutcomeCollector {
    handle: JoinHandle<Vec<RequestOutcome>>,
}

impl OutcomeCollector {
    /// Wait for every sink to be dropped and return the finished log
    pub async fn finish(self) -> Result<OutcomeLog> {
        let outcomes = self.handle.await?;
        Ok(OutcomeLog::from(outcomes))
    }
}

/// Create a sink/collector pair. Each received outcome is also fed to `live`.
pub fn outcome_channel(live: Arc<LiveMetrics>, phase: &str) -> (OutcomeSink, OutcomeCollector) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RequestOutcome>();
    let phase = phase.to_string();

    let handle = tokio::spawn(async move {
        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            live.observe(&phase, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    });

    (OutcomeSink { tx }, OutcomeCollector { handle })
}

// ============================================================================
// LOG
// ============================================================================

/// Immutable snapshot of a phase's outcomes
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    outcomes: Vec<RequestOutcome>,
}

impl From<Vec<RequestOutcome>> for OutcomeLog {
    fn from(outcomes: Vec<RequestOutcome>) -> Self {
        Self { outcomes }
    }
}

impl OutcomeLog {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RequestOutcome> {
        self.outcomes.iter()
    }

    /// Outcomes grouped by algorithm label
    pub fn by_algorithm(&self) -> BTreeMap<&str, Vec<&RequestOutcome>> {
        self.group_by(|o| o.algorithm.as_str())
    }

    /// Outcomes grouped by logical endpoint
    pub fn by_endpoint(&self) -> BTreeMap<&str, Vec<&RequestOutcome>> {
        self.group_by(|o| o.endpoint.as_str())
    }

    /// Outcomes grouped by algorithm, then endpoint
    pub fn by_algorithm_and_endpoint(&self) -> BTreeMap<&str, BTreeMap<&str, Vec<&RequestOutcome>>> {
        let mut groups: BTreeMap<&str, BTreeMap<&str, Vec<&RequestOutcome>>> = BTreeMap::new();
        for outcome in &self.outcomes {
            groups
                .entry(outcome.algorithm.as_str())
                .or_default()
                .entry(outcome.endpoint.as_str())
                .or_default()
                .push(outcome);
        }
        groups
    }

    fn group_by<'a, F>(&'a self, key: F) -> BTreeMap<&'a str, Vec<&'a RequestOutcome>>
    where
        F: Fn(&'a RequestOutcome) -> &'a str,
    {
        let mut groups: BTreeMap<&str, Vec<&RequestOutcome>> = BTreeMap::new();
        for outcome in &self.outcomes {
            groups.entry(key(outcome)).or_default().push(outcome);
        }
        groups
    }
}

impl<'a> IntoIterator for &'a OutcomeLog {
    type Item = &'a RequestOutcome;
    type IntoIter = std::slice::Iter<'a, RequestOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an outcome with the fields tests usually care about
    pub(crate) fn outcome(
        timestamp_ms: i64,
        latency_ms: f64,
        verdict: Verdict,
        error: Option<&str>,
        algorithm: &str,
        endpoint: &str,
    ) -> RequestOutcome {
        RequestOutcome {
            timestamp_ms,
            latency_ms,
            status_code: if error.is_some() { 0 } else { 200 },
            verdict,
            error: error.map(str::to_string),
            key: format!("{}:user:guest:1", algorithm.to_lowercase()),
            endpoint: endpoint.to_string(),
            algorithm: algorithm.to_string(),
            tokens: 1,
            remaining_tokens: None,
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn test_collector_receives_from_all_sinks() {
        let live = Arc::new(LiveMetrics::new().unwrap());
        let (sink, collector) = outcome_channel(live.clone(), "main");

        let mut handles = Vec::new();
        for worker in 0..4 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    sink.record(outcome(
                        worker * 1000 + i,
                        1.0,
                        Verdict::Allowed,
                        None,
                        "TOKEN_BUCKET",
                        "rate_limit_check",
                    ));
                }
            }));
        }
        drop(sink);
        for handle in handles {
            handle.await.unwrap();
        }

        let log = collector.finish().await.unwrap();
        assert_eq!(log.len(), 100);
        assert_eq!(live.snapshot("main").requests, 100);
    }

    #[test]
    fn test_grouping() {
        let log = OutcomeLog::from(vec![
            outcome(0, 1.0, Verdict::Allowed, None, "TOKEN_BUCKET", "rate_limit_check"),
            outcome(0, 1.0, Verdict::Unknown, None, "TOKEN_BUCKET", "admin_stats"),
            outcome(0, 1.0, Verdict::Denied, None, "FIXED_WINDOW", "rate_limit_check"),
        ]);

        let by_algo = log.by_algorithm();
        assert_eq!(by_algo["TOKEN_BUCKET"].len(), 2);
        assert_eq!(by_algo["FIXED_WINDOW"].len(), 1);

        let by_endpoint = log.by_endpoint();
        assert_eq!(by_endpoint["rate_limit_check"].len(), 2);

        let nested = log.by_algorithm_and_endpoint();
        assert_eq!(nested["TOKEN_BUCKET"]["admin_stats"].len(), 1);
    }

    #[test]
    fn test_allowed_tristate() {
        let o = outcome(0, 1.0, Verdict::Unknown, Some("timeout"), "A", "metrics");
        assert_eq!(o.allowed(), None);
        assert!(o.is_error());
        assert_eq!(Verdict::from_allowed(false), Verdict::Denied);
    }
}
