//! Pre-flight and post-test health checks

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{RequestSpec, ServiceClient};
use crate::wire::{decode, HealthResponse};

pub const REDIS_INDICATOR: &str = "redisDetailedHealthIndicator";
pub const RATE_LIMITER_INDICATOR: &str = "rateLimiterHealthIndicator";

/// Key used for the functional check request
pub const PREFLIGHT_KEY: &str = "test:preflight:check";

/// Redis round-trip latency above which the service is considered degraded
const MAX_REDIS_LATENCY_MS: u64 = 100;

/// Outcome of the pre-flight checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub passed: bool,
    pub redis_latency_ms: u64,
    pub active_keys: u64,
    pub issues: Vec<String>,
}

/// Check overall health, indicator details, metrics and a functional check call
pub async fn run_preflight(client: &ServiceClient) -> HealthCheckResult {
    info!("Running pre-flight health checks against {}", client.base_url());

    let mut result = HealthCheckResult::default();

    match client.get("/actuator/health").await {
        Ok(exchange) if exchange.status != 200 => result
            .issues
            .push(format!("Health endpoint returned {}", exchange.status)),
        Ok(exchange) => {
            debug!("Health response: {}", exchange.body.chars().take(500).collect::<String>());
            match decode::<HealthResponse>(&exchange.body) {
                Ok(health) => inspect_components(&health, &mut result),
                Err(e) => result.issues.push(format!("Unreadable health response: {e}")),
            }
        }
        Err(e) => result.issues.push(format!("Failed to reach health endpoint: {e}")),
    }

    match client.get("/actuator/metrics").await {
        Ok(exchange) if exchange.status == 200 => info!("Metrics endpoint: accessible"),
        Ok(exchange) => result
            .issues
            .push(format!("Metrics endpoint returned {}", exchange.status)),
        Err(e) => result
            .issues
            .push(format!("Failed to reach metrics endpoint: {e}")),
    }

    match client
        .execute(&RequestSpec::check(PREFLIGHT_KEY, 1, "127.0.0.1"))
        .await
    {
        Ok(exchange) if exchange.status == 200 => info!("Rate limit check endpoint: functional"),
        Ok(exchange) => result
            .issues
            .push(format!("Rate limit check endpoint returned {}", exchange.status)),
        Err(e) => result
            .issues
            .push(format!("Failed to test rate limit endpoint: {e}")),
    }

    result.passed = result.issues.is_empty();
    if result.passed {
        info!("All pre-flight checks passed");
    } else {
        for issue in &result.issues {
            warn!("Pre-flight issue: {}", issue);
        }
    }
    result
}

fn inspect_components(health: &HealthResponse, result: &mut HealthCheckResult) {
    if health.status != "UP" {
        result
            .issues
            .push(format!("Service status is {}, not UP", health.status));
    }

    match health.components.get(REDIS_INDICATOR) {
        None => warn!(
            "Redis health indicator not found; available components: {:?}",
            health.components.keys().collect::<Vec<_>>()
        ),
        Some(redis) if redis.status != "UP" => {
            result.issues.push(format!("Redis health is {}", redis.status));
        }
        Some(redis) => {
            result.redis_latency_ms = redis.details.latency_ms;
            result.active_keys = redis.details.active_keys;
            if redis.details.latency_ms > MAX_REDIS_LATENCY_MS {
                result.issues.push(format!(
                    "Redis latency too high: {}ms",
                    redis.details.latency_ms
                ));
            }
            info!(
                "Redis health: UP (latency={}ms, keys={})",
                redis.details.latency_ms, redis.details.active_keys
            );
        }
    }

    match health.components.get(RATE_LIMITER_INDICATOR) {
        None => warn!("Rate limiter health indicator not found"),
        Some(rl) if rl.status != "UP" => {
            result.issues.push(format!("Rate limiter health is {}", rl.status));
        }
        Some(_) => info!("Rate limiter health: UP"),
    }
}

/// Re-check overall health after load; returns the issue, if any
pub async fn recheck(client: &ServiceClient) -> Option<String> {
    match client.get("/actuator/health").await {
        Ok(exchange) if exchange.status != 200 => Some(format!(
            "Health endpoint returned {} after test",
            exchange.status
        )),
        Ok(exchange) => match decode::<HealthResponse>(&exchange.body) {
            Ok(health) if health.status == "UP" => {
                info!("System health: UP after test");
                None
            }
            Ok(health) => Some(format!("Service status is {} after test", health.status)),
            Err(e) => Some(format!("Unreadable health response after test: {e}")),
        },
        Err(e) => Some(format!("Failed to reach health endpoint after test: {e}")),
    }
}
