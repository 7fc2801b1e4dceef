//! Worker pool / load driver
//!
//! Each worker runs until the shared deadline: draw a profile, issue the
//! request over its own connection, hand the outcome to the collector, then
//! sleep out the rest of its pacing interval. A request in flight when the
//! deadline passes is allowed to complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, info, warn};

use crate::client::{RequestSpec, ServiceClient};
use crate::config::{resolve_algorithm, AlgorithmConfig, EndpointSpec};
use crate::error::Result;
use crate::metrics::{spawn_progress_logger, LiveMetrics};
use crate::outcome::{outcome_channel, OutcomeLog, OutcomeSink, RequestOutcome, Verdict};
use crate::profile::{TrafficGenerator, TrafficMix, TrafficProfile};
use crate::wire::classify_check;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Shape of one load phase
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Phase label used in logs and metrics
    pub phase: String,
    pub base_url: String,
    pub concurrency: usize,
    pub target_rps: u64,
    pub duration: Duration,
    pub seed: u64,
    pub request_timeout: Duration,
}

impl PoolConfig {
    /// Per-worker rate: `max(1, target_rps / concurrency)`
    pub fn per_worker_rps(&self) -> u64 {
        (self.target_rps / self.concurrency.max(1) as u64).max(1)
    }

    /// Target spacing between requests of one worker
    pub fn request_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.per_worker_rps() as f64)
    }
}

/// Outcomes and wall time of a finished phase
#[derive(Debug)]
pub struct PhaseResult {
    pub log: OutcomeLog,
    pub elapsed: Duration,
}

impl PhaseResult {
    /// Elapsed seconds, truncated the way reports present durations
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.as_secs()
    }
}

/// Fixed-size pool of paced workers
pub struct WorkerPool {
    config: PoolConfig,
    algorithms: Arc<Vec<AlgorithmConfig>>,
    mix: Arc<TrafficMix>,
    live: Arc<LiveMetrics>,
}

struct WorkerContext {
    config: PoolConfig,
    algorithms: Arc<Vec<AlgorithmConfig>>,
    mix: Arc<TrafficMix>,
    started: Instant,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        algorithms: &[AlgorithmConfig],
        endpoints: &[EndpointSpec],
        live: Arc<LiveMetrics>,
    ) -> Result<Self> {
        let mix = Arc::new(TrafficMix::new(endpoints, algorithms)?);
        Ok(Self {
            config,
            algorithms: Arc::new(algorithms.to_vec()),
            mix,
            live,
        })
    }

    /// Run every worker to the deadline and return the collected log
    pub async fn run(&self) -> Result<PhaseResult> {
        info!(
            "[{}] Starting {} workers for {}s at {} RPS ({} RPS per worker) against {}",
            self.config.phase,
            self.config.concurrency,
            self.config.duration.as_secs(),
            self.config.target_rps,
            self.config.per_worker_rps(),
            self.config.base_url
        );

        let (sink, collector) = outcome_channel(self.live.clone(), &self.config.phase);
        let progress = spawn_progress_logger(self.live.clone(), &self.config.phase, PROGRESS_INTERVAL);

        let context = Arc::new(WorkerContext {
            config: self.config.clone(),
            algorithms: self.algorithms.clone(),
            mix: self.mix.clone(),
            started: Instant::now(),
        });

        let mut workers = FuturesUnordered::new();
        for worker_id in 0..self.config.concurrency {
            let context = context.clone();
            let sink = sink.clone();
            workers.push(tokio::spawn(run_worker(context, worker_id, sink)));
        }
        // Only workers hold sinks now; the collector ends when the last one exits
        drop(sink);

        while let Some(joined) = workers.next().await {
            if let Err(e) = joined {
                error!("[{}] Worker task failed: {}", self.config.phase, e);
            }
        }
        let elapsed = context.started.elapsed();
        progress.abort();

        let log = collector.finish().await?;
        info!(
            "[{}] Completed in {:.1}s, collected {} outcomes",
            self.config.phase,
            elapsed.as_secs_f64(),
            log.len()
        );

        Ok(PhaseResult { log, elapsed })
    }
}

async fn run_worker(context: Arc<WorkerContext>, worker_id: usize, sink: OutcomeSink) {
    let config = &context.config;
    let client = match ServiceClient::new(&config.base_url, config.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            warn!("[{}] Worker {} could not create client: {}", config.phase, worker_id, e);
            return;
        }
    };

    let mut generator = TrafficGenerator::for_worker(config.seed, worker_id, context.mix.clone());
    let interval = config.request_interval();
    let deadline = context.started + config.duration;
    let mut sent: u64 = 0;

    while Instant::now() < deadline {
        let profile = generator.next_profile();
        let algorithm = resolve_algorithm(&context.algorithms, &profile.algorithm);

        let t0 = Instant::now();
        let outcome = execute_profile(&client, &profile, algorithm).await;
        sink.record(outcome);
        sent += 1;

        let elapsed = t0.elapsed();
        if elapsed < interval {
            let now = Instant::now();
            if now < deadline {
                tokio::time::sleep((interval - elapsed).min(deadline - now)).await;
            }
        }
    }

    debug!("[{}] Worker {} finished after {} requests", config.phase, worker_id, sent);
}

/// Issue the request for `profile` and turn the exchange into an outcome
pub async fn execute_profile(
    client: &ServiceClient,
    profile: &TrafficProfile,
    algorithm: &AlgorithmConfig,
) -> RequestOutcome {
    let request = RequestSpec::for_endpoint(
        profile.endpoint,
        &profile.key,
        profile.tokens,
        &profile.client_ip,
        &profile.algorithm,
        algorithm,
    );

    let timestamp_ms = chrono::Utc::now().timestamp_millis();
    let t0 = Instant::now();
    let result = client.execute(&request).await;
    let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;

    let mut outcome = RequestOutcome {
        timestamp_ms,
        latency_ms,
        status_code: 0,
        verdict: Verdict::Unknown,
        error: None,
        key: profile.key.clone(),
        endpoint: profile.endpoint.as_str().to_string(),
        algorithm: profile.algorithm.clone(),
        tokens: profile.tokens,
        remaining_tokens: None,
        retry_after: None,
    };

    match result {
        Ok(exchange) => {
            outcome.status_code = exchange.status;
            if profile.endpoint.is_check() {
                match classify_check(&exchange) {
                    Ok(verdict) => {
                        outcome.verdict = Verdict::from_allowed(verdict.allowed);
                        outcome.remaining_tokens = verdict.remaining_tokens;
                        outcome.retry_after = verdict.retry_after;
                    }
                    Err(e) => outcome.error = Some(e.to_string()),
                }
            }
        }
        Err(e) => {
            debug!("Request to {} failed: {}", profile.endpoint, e);
            outcome.error = Some(e.to_string());
        }
    }

    outcome
}
