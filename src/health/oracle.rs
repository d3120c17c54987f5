use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::HealthOracle;
use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};

/// Score below which an endpoint is considered unhealthy
const HEALTHY_THRESHOLD: u8 = 30;

/// Recovery credit granted per health-check pass so a downed endpoint
/// eventually re-enters the rotation
const RECOVERY_CREDIT: u8 = 5;

/// Per-endpoint health and latency tracking
#[derive(Debug)]
struct EndpointHealth {
    endpoint: Endpoint,

    /// Health score from 0-100 (100 = perfectly healthy)
    score: AtomicU8,

    /// Number of consecutive failures (reset on success)
    failures: AtomicU32,

    /// Latency of the most recent successful request
    last_latency_ms: AtomicU64,
}

impl EndpointHealth {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            score: AtomicU8::new(100),
            failures: AtomicU32::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    fn score(&self) -> u8 {
        self.score.load(Ordering::Relaxed)
    }

    fn is_healthy(&self) -> bool {
        self.score() > HEALTHY_THRESHOLD
    }
}

/// Default passive health oracle
///
/// Scores endpoints from request outcomes alone: successes restore score,
/// failures drain it, and the periodic health pass hands back a small
/// recovery credit. Preference order is score-descending with latency as the
/// tie-breaker; the construction order breaks remaining ties, so the first
/// configured endpoint is the primary.
pub struct ScoredHealthOracle {
    endpoints: Vec<EndpointHealth>,
}

impl ScoredHealthOracle {
    /// Build an oracle over a fixed, non-empty endpoint set. The first
    /// endpoint is the designated primary.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(PoolError::Configuration(
                "health oracle requires at least one endpoint".to_string(),
            ));
        }
        Ok(Self {
            endpoints: endpoints.into_iter().map(EndpointHealth::new).collect(),
        })
    }

    /// Current health score for an endpoint, if known
    pub fn score_of(&self, endpoint: &Endpoint) -> Option<u8> {
        self.find(endpoint).map(|h| h.score())
    }

    pub fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        self.find(endpoint).map(|h| h.is_healthy()).unwrap_or(false)
    }

    fn find(&self, endpoint: &Endpoint) -> Option<&EndpointHealth> {
        self.endpoints.iter().find(|h| &h.endpoint == endpoint)
    }
}

impl HealthOracle for ScoredHealthOracle {
    fn primary_endpoint(&self) -> Endpoint {
        self.endpoints[0].endpoint.clone()
    }

    fn ordered_endpoints(&self) -> Vec<Endpoint> {
        let mut ranked: Vec<&EndpointHealth> = self.endpoints.iter().collect();
        // Stable sort: equal scores keep configuration order
        ranked.sort_by(|a, b| {
            b.score().cmp(&a.score()).then_with(|| {
                a.last_latency_ms
                    .load(Ordering::Relaxed)
                    .cmp(&b.last_latency_ms.load(Ordering::Relaxed))
            })
        });
        ranked.into_iter().map(|h| h.endpoint.clone()).collect()
    }

    fn report_success(&self, endpoint: &Endpoint, latency: Duration) {
        if let Some(health) = self.find(endpoint) {
            health.failures.store(0, Ordering::Relaxed);
            health
                .last_latency_ms
                .store(latency.as_millis() as u64, Ordering::Relaxed);
            let current = health.score.load(Ordering::Relaxed);
            health
                .score
                .store(current.saturating_add(10).min(100), Ordering::Relaxed);
        }
    }

    fn report_failure(&self, endpoint: &Endpoint, message: &str) {
        if let Some(health) = self.find(endpoint) {
            let was_healthy = health.is_healthy();
            health.failures.fetch_add(1, Ordering::Relaxed);
            let current = health.score.load(Ordering::Relaxed);
            health
                .score
                .store(current.saturating_sub(20), Ordering::Relaxed);

            if was_healthy && !health.is_healthy() {
                warn!(
                    endpoint = %health.endpoint,
                    score = health.score(),
                    failures = health.failures.load(Ordering::Relaxed),
                    reason = message,
                    "endpoint unhealthy"
                );
            }
        }
    }

    fn perform_health_check(&self) {
        for health in &self.endpoints {
            let current = health.score.load(Ordering::Relaxed);
            if current < 100 {
                health
                    .score
                    .store(current.saturating_add(RECOVERY_CREDIT).min(100), Ordering::Relaxed);
            }
        }
        debug!(endpoints = self.endpoints.len(), "health scores refreshed");
    }
}
