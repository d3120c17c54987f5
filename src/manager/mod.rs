//! Connection pool manager: endpoint → pool map with regional failover
//!
//! The manager owns one fixed round-robin pool per endpoint, follows the
//! health oracle's preference order when failing over, and runs the two
//! maintenance ticks (lifetime eviction, idle cleanup) on behalf of its
//! pools. It performs no health scoring itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ChannelOptions, Config, MaintenanceConfig, PoolConfig};
use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};
use crate::health::HealthOracle;
use crate::metrics::{AggregateMetrics, PoolStatus};
use crate::pool::fixed::FixedChannelPool;
use crate::pool::handle::ConnectionHandle;
use crate::transport::ChannelConnector;

pub struct ChannelManager {
    oracle: Arc<dyn HealthOracle>,
    connector: Arc<dyn ChannelConnector>,
    pool_config: PoolConfig,
    options: ChannelOptions,
    maintenance: MaintenanceConfig,

    /// One pool per endpoint key, created on first request
    pools: RwLock<HashMap<String, Arc<FixedChannelPool>>>,

    metrics: Arc<AggregateMetrics>,
    closed: AtomicBool,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(
        oracle: Arc<dyn HealthOracle>,
        connector: Arc<dyn ChannelConnector>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        config.pool.validate()?;
        Ok(Arc::new(Self {
            oracle,
            connector,
            pool_config: config.pool.clone(),
            options: config.channel.clone(),
            maintenance: config.maintenance.clone(),
            pools: RwLock::new(HashMap::new()),
            metrics: Arc::new(AggregateMetrics::new()),
            closed: AtomicBool::new(false),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the health-check and cleanup ticks
    ///
    /// The two schedules run independently of request traffic; a failing
    /// pass is logged by the pools and never stops the schedule.
    pub fn start_maintenance(self: &Arc<Self>) {
        let health = {
            let manager = Arc::clone(self);
            let interval = self.maintenance.health_check_interval();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if manager.is_closed() {
                        break;
                    }
                    manager.run_health_pass().await;
                }
            })
        };

        let cleanup = {
            let manager = Arc::clone(self);
            let interval = self.maintenance.cleanup_interval();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if manager.is_closed() {
                        break;
                    }
                    manager.run_cleanup_pass().await;
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

    pub fn metrics(&self) -> &AggregateMetrics {
        &self.metrics
    }

    /// Channel to one specific endpoint
    ///
    /// The pool behind the endpoint is created at most once, even under
    /// concurrent first access: the fast path is a shared read, and misses
    /// re-check under the write lock before constructing.
    pub async fn channel(&self, endpoint: &Endpoint) -> Result<Arc<ConnectionHandle>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let key = endpoint.key();

        let existing = {
            let pools = self.pools.read().await;
            pools.get(&key).cloned()
        };
        if let Some(pool) = existing {
            return pool.channel().await;
        }

        let pool = {
            let mut pools = self.pools.write().await;
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }
            match pools.get(&key) {
                Some(pool) => Arc::clone(pool),
                None => {
                    let pool = Arc::new(
                        FixedChannelPool::connect(
                            endpoint.clone(),
                            self.pool_config.max_pool_size,
                            self.pool_config.clone(),
                            self.options.clone(),
                            Arc::clone(&self.connector),
                            Arc::clone(&self.metrics),
                        )
                        .await?,
                    );
                    pools.insert(key, Arc::clone(&pool));
                    pool
                }
            }
        };

        pool.channel().await
    }

    /// Channel from the healthiest reachable endpoint
    ///
    /// Walks the oracle's preference order once, reporting each failure and
    /// moving on. When the whole list is exhausted, the designated primary
    /// is tried as a last resort even if marked unhealthy; only if that too
    /// fails does the call raise `EndpointExhausted`.
    pub async fn channel_with_failover(&self) -> Result<Arc<ConnectionHandle>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let ordered = self.oracle.ordered_endpoints();
        let attempted = ordered.len();

        for endpoint in ordered {
            match self.channel(&endpoint).await {
                Ok(handle) => {
                    debug!(endpoint = %endpoint, "failover selected endpoint");
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "endpoint failed, trying next");
                    self.oracle.report_failure(&endpoint, &e.to_string());
                }
            }
        }

        let primary = self.oracle.primary_endpoint();
        warn!(primary = %primary, "all endpoints failed, falling back to primary");
        self.channel(&primary).await.map_err(|e| {
            PoolError::EndpointExhausted(format!(
                "{} endpoints tried; primary {} last resort failed: {}",
                attempted, primary, e
            ))
        })
    }

    /// Forward a request outcome to the oracle and the aggregate counters
    pub fn report_success(&self, endpoint: &Endpoint, latency: Duration) {
        self.oracle.report_success(endpoint, latency);
        self.metrics.record_request(latency);
    }

    pub fn report_failure(&self, endpoint: &Endpoint, message: &str) {
        self.oracle.report_failure(endpoint, message);
        self.metrics.record_failure();
    }

    /// Delegate to the oracle, then purge pools already shut down so the
    /// endpoint map cannot grow without bound
    pub async fn perform_health_check(&self) {
        self.oracle.perform_health_check();

        let mut pools = self.pools.write().await;
        let before = pools.len();
        pools.retain(|_, pool| !pool.is_closed());
        let purged = before - pools.len();
        if purged > 0 {
            debug!(purged = purged, "dropped shut-down pools");
        }
    }

    /// One health-tick pass: oracle check, pool purge, lifetime eviction
    pub async fn run_health_pass(&self) {
        self.perform_health_check().await;
        for pool in self.pools_snapshot().await {
            pool.evict_expired().await;
        }
    }

    /// One cleanup-tick pass: close excess idle channels in every pool
    pub async fn run_cleanup_pass(&self) {
        for pool in self.pools_snapshot().await {
            pool.sweep_idle().await;
        }
    }

    /// Point-in-time counters across all pools
    pub async fn status(&self) -> PoolStatus {
        let mut active = 0;
        let mut idle = 0;
        for pool in self.pools_snapshot().await {
            let (a, i) = pool.counts().await;
            active += a;
            idle += i;
        }
        PoolStatus {
            total_connections: active + idle,
            active,
            idle,
            max_pool_size: self.pool_config.max_pool_size,
            total_requests: self.metrics.total_requests(),
            avg_response_time_ms: self.metrics.avg_response_time_ms(),
        }
    }

    /// Idempotent shutdown: stops the ticks and shuts every pool down
    /// independently; one pool failing to wind down cleanly never blocks
    /// the others.
    pub async fn shutdown(&self) {
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

        let drained: Vec<(String, Arc<FixedChannelPool>)> =
            self.pools.write().await.drain().collect();

        for (key, pool) in drained {
            debug!(endpoint = %key, "shutting down pool");
            pool.shutdown().await;
        }
        info!("connection pool manager shut down");
    }

    async fn pools_snapshot(&self) -> Vec<Arc<FixedChannelPool>> {
        self.pools.read().await.values().cloned().collect()
    }
}
