//! Lightweight single-channel pool
//!
//! For deployments needing one live channel per endpoint rather than a fixed
//! pool. Channels are created lazily on first access, recreated through
//! double-checked locking when found dead, and maintained by two background
//! ticks: lifetime eviction and idle cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ChannelOptions, MaintenanceConfig, PoolConfig};
use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};
use crate::metrics::{AggregateMetrics, PoolStatus};
use crate::pool::handle::{ChannelState, ConnectionHandle};
use crate::transport::ChannelConnector;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const REPLACE_GRACE: Duration = Duration::from_secs(1);

pub struct LazyChannelPool {
    connector: Arc<dyn ChannelConnector>,
    options: ChannelOptions,

    /// Reconfigurable at runtime; swapped only after validation
    config: std::sync::RwLock<PoolConfig>,

    /// Endpoint served by the no-argument accessor
    active_endpoint: std::sync::RwLock<Endpoint>,

    /// One cached channel per endpoint key
    channels: RwLock<HashMap<String, Arc<ConnectionHandle>>>,

    /// Serializes recreation against the maintenance ticks
    recreate: Mutex<()>,

    closed: AtomicBool,
    metrics: Arc<AggregateMetrics>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl LazyChannelPool {
    pub fn new(
        endpoint: Endpoint,
        config: PoolConfig,
        options: ChannelOptions,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            connector,
            options,
            config: std::sync::RwLock::new(config),
            active_endpoint: std::sync::RwLock::new(endpoint),
            channels: RwLock::new(HashMap::new()),
            recreate: Mutex::new(()),
            closed: AtomicBool::new(false),
            metrics: Arc::new(AggregateMetrics::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the health-check and cleanup ticks
    ///
    /// Each tick isolates its own failures; nothing thrown inside a pass can
    /// stop the schedule.
    pub fn start_maintenance(self: &Arc<Self>, maintenance: &MaintenanceConfig) {
        let health = {
            let pool = Arc::clone(self);
            let interval = maintenance.health_check_interval();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if pool.is_closed() {
                        break;
                    }
                    pool.sweep_expired().await;
                }
            })
        };

        let cleanup = {
            let pool = Arc::clone(self);
            let interval = maintenance.cleanup_interval();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if pool.is_closed() {
                        break;
                    }
                    pool.sweep_idle().await;
                }
            })
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(health);
        tasks.push(cleanup);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The currently configured endpoint
    pub fn active_endpoint(&self) -> Endpoint {
        self.active_endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn config(&self) -> PoolConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Channel to the active endpoint
    pub async fn connection(&self) -> Result<Arc<ConnectionHandle>> {
        let endpoint = self.active_endpoint();
        self.connection_to(&endpoint).await
    }

    /// Cached channel if alive, otherwise double-checked recreation
    pub async fn connection_to(&self, endpoint: &Endpoint) -> Result<Arc<ConnectionHandle>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let max_lifetime = self.config().max_lifetime();
        let key = endpoint.key();

        if let Some(handle) = self.cached_if_live(&key, max_lifetime).await {
            return Ok(handle);
        }

        let _guard = self.recreate.lock().await;

        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        // Re-validate: another caller may have recreated while we waited
        if let Some(handle) = self.cached_if_live(&key, max_lifetime).await {
            return Ok(handle);
        }

        debug!(endpoint = %endpoint, "creating channel");
        let fresh = self.build_handle(endpoint).await?;

        let old = self
            .channels
            .write()
            .await
            .insert(key, Arc::clone(&fresh));
        if let Some(old) = old {
            self.retire(old);
        }

        fresh.touch();
        Ok(fresh)
    }

    /// Apply a new pool configuration
    ///
    /// Rejected atomically: on a validation error the previous configuration
    /// remains fully in effect.
    pub fn configure(&self, new: PoolConfig) -> Result<()> {
        new.validate()?;
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        info!(
            max_pool_size = new.max_pool_size,
            min_idle_connections = new.min_idle_connections,
            "pool reconfigured"
        );
        *config = new;
        Ok(())
    }

    /// Swap the active endpoint and refresh the pool
    pub async fn switch_endpoint(&self, new: Endpoint) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        {
            let mut active = self
                .active_endpoint
                .write()
                .unwrap_or_else(|e| e.into_inner());
            info!(from = %active, to = %new, "switching endpoint");
            *active = new;
        }
        self.refresh().await;
        Ok(())
    }

    /// Drain and close every cached channel; fresh ones are created lazily
    pub async fn refresh(&self) {
        let _guard = self.recreate.lock().await;
        let drained: Vec<(String, Arc<ConnectionHandle>)> =
            self.channels.write().await.drain().collect();

        for (key, handle) in drained {
            if !handle.close(REPLACE_GRACE).await {
                warn!(endpoint = %key, "channel forced down during refresh");
            }
            self.metrics.connection_closed();
        }
        debug!("pool refreshed");
    }

    /// Record a served request against the aggregate counters
    pub fn record_success(&self, latency: Duration) {
        self.metrics.record_request(latency);
    }

    /// Record a failed request; counted, no latency contribution
    pub fn record_failure(&self) {
        self.metrics.record_failure();
    }

    /// Point-in-time counters
    pub async fn status(&self) -> PoolStatus {
        let channels = self.channels.read().await;
        let mut active = 0;
        let mut idle = 0;
        for handle in channels.values() {
            match handle.state() {
                ChannelState::Terminated | ChannelState::ShuttingDown => continue,
                _ => {}
            }
            if Arc::strong_count(handle) > 1 {
                active += 1;
            } else {
                idle += 1;
            }
        }
        PoolStatus {
            total_connections: active + idle,
            active,
            idle,
            max_pool_size: self.config().max_pool_size,
            total_requests: self.metrics.total_requests(),
            avg_response_time_ms: self.metrics.avg_response_time_ms(),
        }
    }

    /// Health tick: evict and transparently recreate channels past their
    /// maximum lifetime
    pub async fn sweep_expired(&self) {
        if self.is_closed() {
            return;
        }
        let max_lifetime = self.config().max_lifetime();
        let _guard = self.recreate.lock().await;

        let expired: Vec<(String, Arc<ConnectionHandle>)> = {
            let channels = self.channels.read().await;
            channels
                .iter()
                .filter(|(_, h)| h.state() != ChannelState::Terminated && h.age() > max_lifetime)
                .map(|(k, h)| (k.clone(), Arc::clone(h)))
                .collect()
        };

        for (key, old) in expired {
            match self.build_handle(old.endpoint()).await {
                Ok(fresh) => {
                    self.channels.write().await.insert(key, fresh);
                    self.retire(old);
                }
                Err(e) => {
                    warn!(endpoint = %key, error = %e, "failed to replace expired channel");
                    self.channels.write().await.remove(&key);
                    self.retire(old);
                }
            }
        }
    }

    /// Cleanup tick: close channels idle beyond the timeout while the idle
    /// count stays at or above the configured floor
    pub async fn sweep_idle(&self) {
        if self.is_closed() {
            return;
        }
        let config = self.config();
        let _guard = self.recreate.lock().await;

        let (mut candidates, idle_total) = {
            let channels = self.channels.read().await;
            let mut candidates: Vec<(String, Duration)> = Vec::new();
            let mut idle_total = 0usize;
            for (key, handle) in channels.iter() {
                let is_idle =
                    handle.state() == ChannelState::Active && Arc::strong_count(handle) == 1;
                if !is_idle {
                    continue;
                }
                idle_total += 1;
                let idle_for = handle.idle_for();
                if idle_for > config.idle_timeout() {
                    candidates.push((key.clone(), idle_for));
                }
            }
            (candidates, idle_total)
        };

        let allowed = idle_total.saturating_sub(config.min_idle_connections);
        if allowed == 0 || candidates.is_empty() {
            return;
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.truncate(allowed);

        let mut closed = 0usize;
        for (key, _) in candidates {
            let removed = self.channels.write().await.remove(&key);
            if let Some(handle) = removed {
                handle.close(REPLACE_GRACE).await;
                self.metrics.connection_closed();
                closed += 1;
            }
        }

        if closed > 0 {
            debug!(closed = closed, "idle channels cleaned up");
        }
    }

    /// Idempotent shutdown: stops the ticks, drains and closes all channels
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }

        let _guard = self.recreate.lock().await;
        let drained: Vec<Arc<ConnectionHandle>> =
            self.channels.write().await.drain().map(|(_, h)| h).collect();

        for handle in drained {
            if !handle.close(SHUTDOWN_GRACE).await {
                warn!(endpoint = %handle.endpoint(), "channel forced down during close");
            }
            self.metrics.connection_closed();
        }
        info!("pool closed");
    }

    async fn cached_if_live(
        &self,
        key: &str,
        max_lifetime: Duration,
    ) -> Option<Arc<ConnectionHandle>> {
        let channels = self.channels.read().await;
        let handle = channels.get(key)?;
        if handle.is_active() && handle.age() <= max_lifetime {
            handle.touch();
            Some(Arc::clone(handle))
        } else {
            None
        }
    }

    async fn build_handle(&self, endpoint: &Endpoint) -> Result<Arc<ConnectionHandle>> {
        let transport = self
            .connector
            .connect(endpoint, &self.options, self.config().connect_timeout())
            .await?;
        let handle = Arc::new(ConnectionHandle::new(endpoint.clone(), transport));
        handle.activate();
        self.metrics.connection_opened();
        Ok(handle)
    }

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
