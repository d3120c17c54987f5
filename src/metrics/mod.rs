use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide request and connection counters
///
/// All fields are lock-free atomics and safe under arbitrary concurrent
/// increment; they feed the status snapshot and nothing else.
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    /// Requests reported back to the pool layer
    total_requests: AtomicU64,

    /// Sum of reported response times in milliseconds
    total_response_time_ms: AtomicU64,

    /// Live transport connections currently held by pools
    active_connections: AtomicU64,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one served request and its observed latency
    pub fn record_request(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record one failed request; counts toward volume, not latency
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A pool opened a transport connection
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A pool closed a transport connection
    pub fn connection_closed(&self) {
        // Saturate at zero; shutdown paths may report a close twice
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_response_time_ms(&self) -> u64 {
        self.total_response_time_ms.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        let requests = self.total_requests();
        if requests == 0 {
            return 0.0;
        }
        self.total_response_time_ms() as f64 / requests as f64
    }
}

/// Point-in-time view of pool state and traffic counters
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStatus {
    /// Transport connections currently held across all pools
    pub total_connections: usize,

    /// Connections currently borrowed by callers
    pub active: usize,

    /// Connections held by a pool with no outstanding borrow
    pub idle: usize,

    /// Configured per-endpoint channel ceiling
    pub max_pool_size: usize,

    /// Requests reported since startup
    pub total_requests: u64,

    /// Mean reported latency in milliseconds
    pub avg_response_time_ms: f64,
}
