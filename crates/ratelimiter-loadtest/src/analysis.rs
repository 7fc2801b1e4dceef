//! Offline analysis of a saved run
//!
//! Reloads `summary.json` (and optionally `timeline.json`) from an output
//! directory and prints comparisons, insights and recommendations.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{LoadTestError, Result};
use crate::report::{LatencyDocument, StatsDocument, Summary};
use crate::timeline::{Spike, Timeline};

/// Spikes listed in the console before truncating
const MAX_LISTED_SPIKES: usize = 5;

pub fn load_summary(dir: &Path) -> Result<Summary> {
    let path = dir.join("summary.json");
    if !path.exists() {
        return Err(LoadTestError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("summary.json not found in {}", dir.display()),
        )));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// `Ok(None)` when the run has no timeline document
pub fn load_timeline(dir: &Path) -> Result<Option<Timeline>> {
    let path = dir.join("timeline.json");
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
}

/// A named group and the value it was ranked by
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub name: String,
    pub value: f64,
}

/// Extremes across algorithms and endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct Insights {
    pub fastest_algorithm: Ranked,
    pub slowest_algorithm: Ranked,
    pub most_used_algorithm: Ranked,
    pub least_used_algorithm: Ranked,
    pub fastest_endpoint: Option<Ranked>,
    pub slowest_endpoint: Option<Ranked>,
}

fn extreme<F>(groups: &BTreeMap<String, StatsDocument>, metric: F, want: Ordering) -> Option<Ranked>
where
    F: Fn(&StatsDocument) -> f64,
{
    groups
        .iter()
        .map(|(name, stats)| Ranked {
            name: name.clone(),
            value: metric(stats),
        })
        .reduce(|best, next| {
            if next.value.total_cmp(&best.value) == want {
                next
            } else {
                best
            }
        })
}

fn avg_latency(stats: &StatsDocument) -> f64 {
    stats.latency_ms.avg
}

fn request_count(stats: &StatsDocument) -> f64 {
    stats.total_requests as f64
}

impl Insights {
    /// `None` when the summary has no per-algorithm data
    pub fn from_summary(summary: &Summary) -> Option<Self> {
        let algos = &summary.by_algorithm;
        Some(Self {
            fastest_algorithm: extreme(algos, avg_latency, Ordering::Less)?,
            slowest_algorithm: extreme(algos, avg_latency, Ordering::Greater)?,
            most_used_algorithm: extreme(algos, request_count, Ordering::Greater)?,
            least_used_algorithm: extreme(algos, request_count, Ordering::Less)?,
            fastest_endpoint: extreme(&summary.by_endpoint, avg_latency, Ordering::Less),
            slowest_endpoint: extreme(&summary.by_endpoint, avg_latency, Ordering::Greater),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recommendation {
    HighErrorRate,
    HighTailLatency,
    Excellent,
}

impl Recommendation {
    pub fn advice(&self) -> &'static [&'static str] {
        match self {
            Self::HighErrorRate => &[
                "⚠ High error rate detected (>1%). Consider:",
                "  - Checking service logs for errors",
                "  - Verifying Redis connectivity",
                "  - Reducing load (concurrency or RPS)",
            ],
            Self::HighTailLatency => &[
                "⚠ High P99 latency (>100ms). Consider:",
                "  - Optimizing algorithm implementations",
                "  - Checking Redis performance",
                "  - Reviewing system resources",
            ],
            Self::Excellent => &["✓ Excellent performance!"],
        }
    }
}

pub fn recommendations(overall: &StatsDocument) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if overall.error_rate_percent > 1.0 {
        out.push(Recommendation::HighErrorRate);
    }
    if overall.latency_ms.p99 > 100.0 {
        out.push(Recommendation::HighTailLatency);
    }
    if overall.success_rate_percent >= 99.5 && overall.latency_ms.p99 < 50.0 {
        out.push(Recommendation::Excellent);
    }
    out
}

/// Min, max and mean of one timeline series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl SeriesStats {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.collect();
        if values.is_empty() {
            return None;
        }
        Some(Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg: values.iter().sum::<f64>() / values.len() as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineAnalysis {
    pub buckets: usize,
    pub requests: usize,
    pub rps: SeriesStats,
    pub p99_ms: SeriesStats,
    pub spikes: Vec<Spike>,
}

impl TimelineAnalysis {
    pub fn of(timeline: &Timeline) -> Option<Self> {
        Some(Self {
            buckets: timeline.len(),
            requests: timeline.total_requests(),
            rps: SeriesStats::of(timeline.iter().map(|(_, b)| b.rps))?,
            p99_ms: SeriesStats::of(timeline.iter().map(|(_, b)| b.p99_ms))?,
            spikes: timeline.spikes(),
        })
    }
}

// ============================================================================
// CONSOLE
// ============================================================================

fn section(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("{:^80}", title);
    println!("{}\n", "=".repeat(80));
}

fn print_latency(l: &LatencyDocument) {
    println!("  Min:    {:>8.3} ms", l.min);
    println!("  Avg:    {:>8.3} ms", l.avg);
    println!("  Median: {:>8.3} ms", l.median);
    println!("  P75:    {:>8.3} ms", l.p75);
    println!("  P90:    {:>8.3} ms", l.p90);
    println!("  P95:    {:>8.3} ms", l.p95);
    println!("  P99:    {:>8.3} ms", l.p99);
    println!("  P99.9:  {:>8.3} ms", l.p999);
    println!("  Max:    {:>8.3} ms", l.max);
    println!("  StdDev: {:>8.3} ms", l.std_dev);
}

fn by_volume(groups: &BTreeMap<String, StatsDocument>) -> Vec<(&String, &StatsDocument)> {
    let mut sorted: Vec<_> = groups.iter().collect();
    sorted.sort_by(|a, b| b.1.total_requests.cmp(&a.1.total_requests));
    sorted
}

fn percent_of(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub fn print_summary_analysis(summary: &Summary) {
    let info = &summary.test_info;
    section("TEST INFORMATION");
    println!("Timestamp:         {}", info.timestamp);
    println!("Duration:          {}s", info.duration_seconds);
    println!("Concurrency:       {}", info.concurrency);
    println!("Target RPS:        {}", info.target_rps);
    println!("Base URL:          {}", info.base_url);

    let o = &summary.overall;
    section("OVERALL STATISTICS");
    println!("Total Requests:    {}", o.total_requests);
    println!("Allowed:           {} ({:.2}%)", o.allowed, percent_of(o.allowed, o.total_requests));
    println!("Denied:            {} ({:.2}%)", o.denied, percent_of(o.denied, o.total_requests));
    println!("Errors:            {} ({:.2}%)", o.errors, o.error_rate_percent);
    println!("Actual RPS:        {:.2}", o.rps);
    println!("Success Rate:      {:.2}%", o.success_rate_percent);
    println!("\nLatency Statistics:");
    print_latency(&o.latency_ms);

    let algos = by_volume(&summary.by_algorithm);
    section("ALGORITHM COMPARISON");
    println!(
        "{:<25} {:>10} {:>8} {:>10} {:>10} {:>10}",
        "Algorithm", "Requests", "RPS", "Avg (ms)", "P95 (ms)", "P99 (ms)"
    );
    println!("{} {} {} {} {} {}", "-".repeat(25), "-".repeat(10), "-".repeat(8), "-".repeat(10), "-".repeat(10), "-".repeat(10));
    for (name, s) in &algos {
        println!(
            "{:<25} {:>10} {:>8.1} {:>10.3} {:>10.3} {:>10.3}",
            name, s.total_requests, s.rps, s.latency_ms.avg, s.latency_ms.p95, s.latency_ms.p99
        );
    }

    section("DETAILED ALGORITHM STATISTICS");
    for (name, s) in &algos {
        println!("\n{name}:");
        println!("  Total Requests:  {}", s.total_requests);
        println!("  Allowed:         {}", s.allowed);
        println!("  Denied:          {}", s.denied);
        println!("  Errors:          {}", s.errors);
        println!("  RPS:             {:.2}", s.rps);
        println!("  Success Rate:    {:.2}%", s.success_rate_percent);
        println!("  Latency:");
        print_latency(&s.latency_ms);
    }

    let endpoints = by_volume(&summary.by_endpoint);
    section("ENDPOINT COMPARISON");
    println!(
        "{:<30} {:>10} {:>8} {:>10} {:>10} {:>8}",
        "Endpoint", "Requests", "RPS", "Avg (ms)", "P95 (ms)", "Errors"
    );
    println!("{} {} {} {} {} {}", "-".repeat(30), "-".repeat(10), "-".repeat(8), "-".repeat(10), "-".repeat(10), "-".repeat(8));
    for (name, s) in &endpoints {
        println!(
            "{:<30} {:>10} {:>8.1} {:>10.3} {:>10.3} {:>8}",
            name, s.total_requests, s.rps, s.latency_ms.avg, s.latency_ms.p95, s.errors
        );
    }

    if let Some(insights) = Insights::from_summary(summary) {
        section("PERFORMANCE INSIGHTS");
        println!("Fastest Algorithm:  {} (avg: {:.3} ms)", insights.fastest_algorithm.name, insights.fastest_algorithm.value);
        println!("Slowest Algorithm:  {} (avg: {:.3} ms)", insights.slowest_algorithm.name, insights.slowest_algorithm.value);
        println!("\nMost Used:          {} ({} requests)", insights.most_used_algorithm.name, insights.most_used_algorithm.value);
        println!("Least Used:         {} ({} requests)", insights.least_used_algorithm.name, insights.least_used_algorithm.value);
        if let (Some(fast), Some(slow)) = (&insights.fastest_endpoint, &insights.slowest_endpoint) {
            println!("\nFastest Endpoint:   {} (avg: {:.3} ms)", fast.name, fast.value);
            println!("Slowest Endpoint:   {} (avg: {:.3} ms)", slow.name, slow.value);
        }
    }

    if o.errors > 0 {
        section("ERROR ANALYSIS");
        println!("Total Errors:       {}", o.errors);
        println!("Error Rate:         {:.2}%", o.error_rate_percent);
        println!("\nErrors by Algorithm:");
        for (name, s) in algos.iter().filter(|(_, s)| s.errors > 0) {
            println!("  {:<25} {:>8} ({:>6.2}%)", name, s.errors, s.error_rate_percent);
        }
        println!("\nErrors by Endpoint:");
        for (name, s) in endpoints.iter().filter(|(_, s)| s.errors > 0) {
            println!("  {:<30} {:>8} ({:>6.2}%)", name, s.errors, s.error_rate_percent);
        }
    }

    section("RECOMMENDATIONS");
    for recommendation in recommendations(o) {
        for line in recommendation.advice() {
            println!("{line}");
        }
        if recommendation == Recommendation::Excellent {
            println!("  - Success rate: {:.2}%", o.success_rate_percent);
            println!("  - P99 latency: {:.3} ms", o.latency_ms.p99);
        }
    }
    println!();
}

pub fn print_timeline_analysis(analysis: &TimelineAnalysis) {
    section("TIMELINE ANALYSIS");
    println!("Time Buckets:      {}", analysis.buckets);
    println!("Requests:          {}", analysis.requests);
    println!("\nRPS Statistics:");
    println!("  Min:             {:.2}", analysis.rps.min);
    println!("  Max:             {:.2}", analysis.rps.max);
    println!("  Avg:             {:.2}", analysis.rps.avg);
    println!("\nP99 Latency Over Time:");
    println!("  Min:             {:.3} ms", analysis.p99_ms.min);
    println!("  Max:             {:.3} ms", analysis.p99_ms.max);
    println!("  Avg:             {:.3} ms", analysis.p99_ms.avg);

    if !analysis.spikes.is_empty() {
        println!("\n⚠ Detected {} latency spikes (>2x average):", analysis.spikes.len());
        for spike in analysis.spikes.iter().take(MAX_LISTED_SPIKES) {
            println!("  Timestamp {}: {:.3} ms", spike.second, spike.p99_ms);
        }
    }
    println!();
}

/// Analyze the run saved in `dir`
pub fn analyze(dir: &Path, with_timeline: bool) -> Result<()> {
    if !dir.exists() {
        return Err(LoadTestError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("directory not found: {}", dir.display()),
        )));
    }

    let summary = load_summary(dir)?;
    print_summary_analysis(&summary);

    if with_timeline {
        match load_timeline(dir)?.as_ref().and_then(TimelineAnalysis::of) {
            Some(analysis) => print_timeline_analysis(&analysis),
            None => tracing::warn!("timeline.json not found or empty in {}", dir.display()),
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("Analysis complete!");
    println!("{}\n", "=".repeat(80));
    Ok(())
}
