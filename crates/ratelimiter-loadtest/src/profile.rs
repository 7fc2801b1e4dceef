//! Synthetic traffic profiles
//!
//! A [`TrafficGenerator`] owns a seeded ChaCha RNG, so the same seed and the
//! same call sequence always produce the same traffic.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::{AlgorithmConfig, EndpointKind, EndpointSpec};
use crate::error::{LoadTestError, Result};

/// Pick a value from `(value, weight)` pairs.
///
/// Draws `u` in `[0, 1)` and returns the first value whose cumulative weight
/// reaches `u`. Falls back to the last entry when the weights sum to slightly
/// less than `u` through rounding. Returns `None` only for an empty list.
pub fn weighted_choice<'a, T, R>(rng: &mut R, items: &'a [(T, f64)]) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    let u: f64 = rng.gen();
    let mut acc = 0.0;
    for (value, weight) in items {
        acc += weight;
        if u <= acc {
            return Some(value);
        }
    }
    items.last().map(|(value, _)| value)
}

/// Customer tier embedded in generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Guest,
    Registered,
    Premium,
    Vip,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Registered => "registered",
            Self::Premium => "premium",
            Self::Vip => "vip",
        }
    }
}

/// Weighted distributions used to shape traffic
#[derive(Debug, Clone)]
pub struct TrafficMix {
    endpoints: Vec<(EndpointKind, f64)>,
    tiers: Vec<(UserTier, f64)>,
    tokens: Vec<(u32, f64)>,
    algorithms: Vec<String>,
    max_user_id: u32,
}

impl TrafficMix {
    pub fn new(endpoints: &[EndpointSpec], algorithms: &[AlgorithmConfig]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(LoadTestError::InvalidConfig("traffic mix has no endpoints".into()));
        }
        if algorithms.is_empty() {
            return Err(LoadTestError::InvalidConfig("traffic mix has no algorithms".into()));
        }

        Ok(Self {
            endpoints: endpoints.iter().map(|e| (e.kind, e.weight)).collect(),
            tiers: vec![
                (UserTier::Guest, 0.60),
                (UserTier::Registered, 0.30),
                (UserTier::Premium, 0.08),
                (UserTier::Vip, 0.02),
            ],
            tokens: vec![(1, 0.70), (2, 0.20), (5, 0.08), (10, 0.02)],
            algorithms: algorithms.iter().map(|a| a.name.clone()).collect(),
            max_user_id: 10_000,
        })
    }
}

/// Parameters for one synthetic request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficProfile {
    /// `<algorithm>:user:<tier>:<id>`
    pub key: String,
    pub endpoint: EndpointKind,
    pub tokens: u32,
    pub client_ip: String,
    pub algorithm: String,
    pub tier: UserTier,
}

/// Deterministic source of traffic profiles
pub struct TrafficGenerator {
    rng: ChaCha8Rng,
    mix: std::sync::Arc<TrafficMix>,
}

impl TrafficGenerator {
    pub fn new(seed: u64, mix: std::sync::Arc<TrafficMix>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            mix,
        }
    }

    /// Generator for worker `index` under a global `seed`
    pub fn for_worker(seed: u64, index: usize, mix: std::sync::Arc<TrafficMix>) -> Self {
        Self::new(seed.wrapping_add(index as u64), mix)
    }

    pub fn next_profile(&mut self) -> TrafficProfile {
        let mix = &self.mix;
        let rng = &mut self.rng;

        // TrafficMix::new rejects empty lists
        let endpoint = weighted_choice(rng, &mix.endpoints)
            .copied()
            .unwrap_or(EndpointKind::RateLimitCheck);
        let tier = weighted_choice(rng, &mix.tiers)
            .copied()
            .unwrap_or(UserTier::Guest);
        let user_id = rng.gen_range(1..=mix.max_user_id);
        let algorithm = mix.algorithms[rng.gen_range(0..mix.algorithms.len())].clone();
        let tokens = weighted_choice(rng, &mix.tokens).copied().unwrap_or(1);
        let client_ip = format!(
            "10.{}.{}.{}",
            rng.gen_range(0..=255u8),
            rng.gen_range(0..=255u8),
            rng.gen_range(1..=254u8)
        );

        TrafficProfile {
            key: format!(
                "{}:user:{}:{}",
                algorithm.to_lowercase(),
                tier.as_str(),
                user_id
            ),
            endpoint,
            tokens,
            client_ip,
            algorithm,
            tier,
        }
    }
}
