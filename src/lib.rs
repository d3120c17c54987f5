//! veripool - Connection pooling and regional failover for streaming-RPC
//! verification gateways

pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod transport;

pub use config::{ChannelOptions, Config, MaintenanceConfig, PoolConfig};
pub use endpoint::{Endpoint, Scheme};
pub use error::{PoolError, Result};
pub use health::{HealthOracle, ScoredHealthOracle};
pub use manager::ChannelManager;
pub use metrics::{AggregateMetrics, PoolStatus};
pub use pool::{ChannelState, ConnectionHandle, FixedChannelPool, LazyChannelPool};
pub use transport::{ChannelConnector, H2Channel, H2Connector, TransportChannel};
