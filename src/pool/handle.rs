use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::transport::TransportChannel;

/// How often a closing handle re-checks the transport for termination
const TERMINATION_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a pooled channel
///
/// Only `Active` handles are ever returned to callers; anything else is
/// transparently replaced at access time or by the maintenance passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Created = 0,
    Active = 1,
    Stale = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ChannelState::Created,
            1 => ChannelState::Active,
            2 => ChannelState::Stale,
            3 => ChannelState::ShuttingDown,
            _ => ChannelState::Terminated,
        }
    }
}

/// Access bookkeeping used for idle/lifetime decisions, never for correctness
#[derive(Debug)]
pub struct ConnectionMetrics {
    created_at: Instant,
    last_access: RwLock<Instant>,
    access_count: AtomicU64,
}

impl ConnectionMetrics {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_access: RwLock::new(now),
            access_count: AtomicU64::new(0),
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }
}

/// One pooled transport connection
///
/// Owned exclusively by the pool that created it; callers borrow an `Arc`
/// but never close the handle directly.
#[derive(Debug)]
pub struct ConnectionHandle {
    endpoint: Endpoint,
    transport: Box<dyn TransportChannel>,
    state: AtomicU8,
    metrics: ConnectionMetrics,
}

impl ConnectionHandle {
    pub fn new(endpoint: Endpoint, transport: Box<dyn TransportChannel>) -> Self {
        Self {
            endpoint,
            transport,
            state: AtomicU8::new(ChannelState::Created as u8),
            metrics: ConnectionMetrics::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The underlying transport, for callers that need to issue requests
    pub fn transport(&self) -> &dyn TransportChannel {
        self.transport.as_ref()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Promote a freshly built handle into service
    pub fn activate(&self) {
        self.state
            .store(ChannelState::Active as u8, Ordering::Release);
    }

    /// Flag the handle for replacement without tearing it down yet
    pub fn mark_stale(&self) {
        let _ = self.state.compare_exchange(
            ChannelState::Active as u8,
            ChannelState::Stale as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Whether the handle may be returned to a caller
    pub fn is_active(&self) -> bool {
        self.state() == ChannelState::Active && self.transport.is_ready()
    }

    /// Record a borrow for idle-tracking
    pub fn touch(&self) {
        if let Ok(mut last) = self.metrics.last_access.write() {
            *last = Instant::now();
        }
        self.metrics.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn age(&self) -> Duration {
        self.metrics.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.metrics
            .last_access
            .read()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Graceful-then-forced shutdown with a bounded wait
    ///
    /// Returns true when the transport wound down within the grace period,
    /// false when it had to be torn down forcibly. Safe to call more than
    /// once; the transport's own shutdown is idempotent.
    pub async fn close(&self, grace: Duration) -> bool {
        self.state
            .store(ChannelState::ShuttingDown as u8, Ordering::Release);
        self.transport.shutdown();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.transport.is_terminated() {
                self.state
                    .store(ChannelState::Terminated as u8, Ordering::Release);
                debug!(endpoint = %self.endpoint, "channel terminated gracefully");
                return true;
            }
            sleep(TERMINATION_POLL).await;
        }

        self.transport.force_shutdown();
        self.state
            .store(ChannelState::Terminated as u8, Ordering::Release);
        debug!(endpoint = %self.endpoint, "channel termination forced");
        false
    }
}
