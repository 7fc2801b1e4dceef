//! # Rate Limiter Load Testing Harness
//!
//! Load generation, statistics and correctness validation for a remote
//! rate-limiter HTTP service.
//!
//! ## Features
//!
//! - **Synthetic Traffic**: seeded, weighted endpoint/tier/token mix per worker
//! - **Paced Worker Pool**: fixed concurrency, per-worker RPS, one connection each
//! - **Statistics**: nearest-rank percentiles, per-algorithm and per-endpoint breakdowns
//! - **Timelines**: per-second buckets with latency spike detection
//! - **Edge Cases**: scripted limiter correctness scenarios on fresh keys
//! - **Metrics Collection**: Prometheus-compatible counters and HDR histograms
//!
//! ## Usage
//!
//! ```bash
//! # Full session against a local service
//! cargo run --package ratelimiter-loadtest -- --base-url http://localhost:8080 --duration-seconds 60
//!
//! # Quick run without the slow server-side phases
//! cargo run --package ratelimiter-loadtest -- --duration-seconds 30 --skip-benchmark --skip-performance
//!
//! # Re-analyze a saved run
//! cargo run --package ratelimiter-loadtest -- analyze data/comprehensive_loadtest --timeline
//! ```

pub mod analysis;
pub mod client;
pub mod config;
pub mod driver;
pub mod edge_cases;
pub mod error;
pub mod health;
pub mod metrics;
pub mod outcome;
pub mod profile;
pub mod remote;
pub mod report;
pub mod runner;
pub mod setup;
pub mod stats;
pub mod timeline;
pub mod validation;
pub mod wire;

pub use config::{AlgorithmConfig, EndpointKind, EndpointSpec, RunConfig};
pub use error::{LoadTestError, Result};
pub use runner::{LoadTestRunner, RunOutcome};
