//! Fixed-size round-robin channel pool
//!
//! One pool per endpoint. Handles are built eagerly at construction and
//! served round-robin; a dead slot is recreated in place under the rebuild
//! lock without disturbing the other slots.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ChannelOptions, PoolConfig};
use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};
use crate::metrics::AggregateMetrics;
use crate::pool::handle::{ChannelState, ConnectionHandle};
use crate::transport::ChannelConnector;

/// Bounded wait for a graceful wind-down during full pool shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bounded wait when a single handle is replaced or swept
const REPLACE_GRACE: Duration = Duration::from_secs(1);

pub struct FixedChannelPool {
    endpoint: Endpoint,
    connector: Arc<dyn ChannelConnector>,
    options: ChannelOptions,
    config: PoolConfig,

    /// Slot array; length is fixed at `size` for the pool's lifetime
    slots: RwLock<Vec<Arc<ConnectionHandle>>>,

    /// Serializes slot recreation against eviction and shutdown
    rebuild: Mutex<()>,

    /// Round-robin cursor
    cursor: AtomicUsize,

    closed: AtomicBool,
    created_at: Instant,
    metrics: Arc<AggregateMetrics>,
}

impl std::fmt::Debug for FixedChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedChannelPool")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FixedChannelPool {
    /// Eagerly build a pool of `size` channels to one endpoint
    ///
    /// Fails fast on a zero size or on the first channel the transport
    /// builder cannot produce; partially built channels are closed again.
    pub async fn connect(
        endpoint: Endpoint,
        size: usize,
        config: PoolConfig,
        options: ChannelOptions,
        connector: Arc<dyn ChannelConnector>,
        metrics: Arc<AggregateMetrics>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(PoolError::Configuration(
                "pool size must be greater than 0".to_string(),
            ));
        }

        let pool = Self {
            endpoint,
            connector,
            options,
            config,
            slots: RwLock::new(Vec::with_capacity(size)),
            rebuild: Mutex::new(()),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics,
        };

        let mut built: Vec<Arc<ConnectionHandle>> = Vec::with_capacity(size);
        for _ in 0..size {
            match pool.build_handle().await {
                Ok(handle) => built.push(handle),
                Err(e) => {
                    for handle in built {
                        handle.close(REPLACE_GRACE).await;
                        pool.metrics.connection_closed();
                    }
                    return Err(e);
                }
            }
        }

        info!(
            endpoint = %pool.endpoint,
            size = size,
            "connection pool created"
        );

        *pool.slots.write().await = built;
        Ok(pool)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Next channel in round-robin order
    ///
    /// Fast path is a shared read of the slot array; only recreation of a
    /// dead slot takes the rebuild lock, and the re-validation under that
    /// lock keeps two callers from recreating the same slot twice.
    pub async fn channel(&self) -> Result<Arc<ConnectionHandle>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let (idx, len) = {
            let slots = self.slots.read().await;
            if slots.is_empty() {
                return Err(PoolError::PoolClosed);
            }
            (self.cursor.fetch_add(1, Ordering::Relaxed) % slots.len(), slots.len())
        };
        debug_assert!(idx < len);

        if let Some(handle) = self.slot_if_active(idx).await {
            return Ok(handle);
        }

        // Slot is dead; rebuild it without touching the others
        let _guard = self.rebuild.lock().await;

        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        // Another caller may have rebuilt the slot while we waited
        if let Some(handle) = self.slot_if_active(idx).await {
            return Ok(handle);
        }

        debug!(endpoint = %self.endpoint, slot = idx, "recreating dead channel");
        let fresh = self.build_handle().await?;

        let old = {
            let mut slots = self.slots.write().await;
            match slots.get_mut(idx) {
                Some(slot) => std::mem::replace(slot, Arc::clone(&fresh)),
                None => return Err(PoolError::PoolClosed),
            }
        };
        self.retire(old);

        fresh.touch();
        Ok(fresh)
    }

    /// (borrowed, idle) counts over live handles
    pub async fn counts(&self) -> (usize, usize) {
        let slots = self.slots.read().await;
        let mut active = 0;
        let mut idle = 0;
        for slot in slots.iter() {
            match slot.state() {
                ChannelState::Terminated | ChannelState::ShuttingDown => continue,
                _ => {}
            }
            if Arc::strong_count(slot) > 1 {
                active += 1;
            } else {
                idle += 1;
            }
        }
        (active, idle)
    }

    /// Replace handles that outlived `max_lifetime`; driven by the health tick
    ///
    /// A handle that cannot be replaced right away is marked stale so the
    /// access path retries the recreation.
    pub async fn evict_expired(&self) {
        if self.is_closed() {
            return;
        }

        let _guard = self.rebuild.lock().await;
        let len = self.slots.read().await.len();
        let mut evicted = 0usize;

        for idx in 0..len {
            let old = match self.slots.read().await.get(idx) {
                Some(slot) => Arc::clone(slot),
                None => break,
            };
            if old.state() == ChannelState::Terminated
                || old.age() <= self.config.max_lifetime()
            {
                continue;
            }

            match self.build_handle().await {
                Ok(fresh) => {
                    if let Some(slot) = self.slots.write().await.get_mut(idx) {
                        *slot = fresh;
                    }
                    self.retire(old);
                    evicted += 1;
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.endpoint,
                        slot = idx,
                        error = %e,
                        "failed to replace expired channel"
                    );
                    old.mark_stale();
                }
            }
        }

        if evicted > 0 {
            debug!(endpoint = %self.endpoint, evicted = evicted, "expired channels replaced");
        }
    }

    /// Close handles idle beyond `idle_timeout`, never dropping the idle
    /// count below `min_idle_connections`; driven by the cleanup tick
    ///
    /// Closed slots stay in place as terminated handles and are lazily
    /// regrown by the access path.
    pub async fn sweep_idle(&self) {
        if self.is_closed() {
            return;
        }

        let _guard = self.rebuild.lock().await;

        let (mut candidates, idle_total) = {
            let slots = self.slots.read().await;
            let mut candidates: Vec<(usize, Duration)> = Vec::new();
            let mut idle_total = 0usize;
            for (idx, slot) in slots.iter().enumerate() {
                let is_idle = slot.state() == ChannelState::Active && Arc::strong_count(slot) == 1;
                if !is_idle {
                    continue;
                }
                idle_total += 1;
                let idle_for = slot.idle_for();
                if idle_for > self.config.idle_timeout() {
                    candidates.push((idx, idle_for));
                }
            }
            (candidates, idle_total)
        };

        let allowed = idle_total.saturating_sub(self.config.min_idle_connections);
        if allowed == 0 || candidates.is_empty() {
            return;
        }

        // Longest-idle first
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.truncate(allowed);

        let mut closed = 0usize;
        for (idx, _) in candidates {
            let handle = match self.slots.read().await.get(idx) {
                Some(slot) => Arc::clone(slot),
                None => continue,
            };
            handle.close(REPLACE_GRACE).await;
            self.metrics.connection_closed();
            closed += 1;
        }

        if closed > 0 {
            debug!(endpoint = %self.endpoint, closed = closed, "idle channels cleaned up");
        }
    }

    /// Shut down every handle, gracefully first and forcibly on timeout
    ///
    /// Idempotent; per-handle failures are logged and never block the rest.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _guard = self.rebuild.lock().await;
        let drained: Vec<Arc<ConnectionHandle>> = self.slots.write().await.drain(..).collect();

        let mut forced = 0usize;
        for handle in drained {
            if !handle.close(SHUTDOWN_GRACE).await {
                forced += 1;
            }
            self.metrics.connection_closed();
        }

        if forced > 0 {
            warn!(
                endpoint = %self.endpoint,
                forced = forced,
                "channels required forced termination during shutdown"
            );
        }
        info!(endpoint = %self.endpoint, "connection pool shut down");
    }

    async fn slot_if_active(&self, idx: usize) -> Option<Arc<ConnectionHandle>> {
        let slots = self.slots.read().await;
        let handle = slots.get(idx)?;
        if handle.is_active() {
            handle.touch();
            Some(Arc::clone(handle))
        } else {
            None
        }
    }

    async fn build_handle(&self) -> Result<Arc<ConnectionHandle>> {
        let transport = self
            .connector
            .connect(&self.endpoint, &self.options, self.config.connect_timeout())
            .await?;
        let handle = Arc::new(ConnectionHandle::new(self.endpoint.clone(), transport));
        handle.activate();
        self.metrics.connection_opened();
        Ok(handle)
    }

    /// Close a replaced handle off the caller's critical path
    fn retire(&self, old: Arc<ConnectionHandle>) {
        if old.state() == ChannelState::Terminated {
            return;
        }
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            old.close(REPLACE_GRACE).await;
            metrics.connection_closed();
        });
    }
}
