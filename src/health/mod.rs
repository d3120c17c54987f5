//! Endpoint health contract consumed by the pool manager
//!
//! The manager performs no scoring itself: it forwards success/failure
//! signals here and follows the ordering the oracle hands back.

mod oracle;

pub use oracle::ScoredHealthOracle;

use std::time::Duration;

use crate::endpoint::Endpoint;

/// Orders endpoints by preference and absorbs success/failure signals
pub trait HealthOracle: Send + Sync {
    /// The designated primary endpoint, used as the failover last resort
    /// even when marked unhealthy
    fn primary_endpoint(&self) -> Endpoint;

    /// All known endpoints in preference order, healthiest first
    fn ordered_endpoints(&self) -> Vec<Endpoint>;

    /// A request against `endpoint` completed with the given latency
    fn report_success(&self, endpoint: &Endpoint, latency: Duration);

    /// A request or connection attempt against `endpoint` failed
    fn report_failure(&self, endpoint: &Endpoint, message: &str);

    /// Periodic re-evaluation hook, driven by the manager's health tick
    fn perform_health_check(&self);
}
