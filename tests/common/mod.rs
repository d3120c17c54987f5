//! Shared test support: an in-memory transport so the pool and failover
//! layers can be exercised without a live gateway
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use veripool::config::ChannelOptions;
use veripool::endpoint::Endpoint;
use veripool::error::{PoolError, Result};
use veripool::transport::{ChannelConnector, TransportChannel};

/// In-memory stand-in for a transport connection
#[derive(Debug)]
pub struct MockChannel {
    pub id: usize,
    ready: AtomicBool,
    shut: AtomicBool,
    terminated: AtomicBool,
}

impl MockChannel {
    fn new(id: usize) -> Self {
        Self {
            id,
            ready: AtomicBool::new(true),
            shut: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    /// Simulate the peer dropping the connection
    pub fn kill(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }
}

impl TransportChannel for MockChannel {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed) && !self.shut.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.shut.store(true, Ordering::Relaxed);
        self.terminated.store(true, Ordering::Relaxed);
    }

    fn force_shutdown(&self) {
        self.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.shut.load(Ordering::Relaxed)
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }
}

/// Connector producing mock channels, with per-endpoint failure injection
#[derive(Default)]
pub struct MockConnector {
    built: AtomicUsize,
    refused: Mutex<HashSet<String>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total channels successfully built
    pub fn built(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }

    /// Connect attempts (successful or not) against one endpoint
    pub fn attempts(&self, endpoint: &Endpoint) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(&endpoint.key())
            .copied()
            .unwrap_or(0)
    }

    pub fn refuse(&self, endpoint: &Endpoint) {
        self.refused.lock().unwrap().insert(endpoint.key());
    }

    pub fn allow(&self, endpoint: &Endpoint) {
        self.refused.lock().unwrap().remove(&endpoint.key());
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _options: &ChannelOptions,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn TransportChannel>> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(endpoint.key())
            .or_insert(0) += 1;

        if self.refused.lock().unwrap().contains(&endpoint.key()) {
            return Err(PoolError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "connection refused (injected)".to_string(),
            });
        }

        let id = self.built.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockChannel::new(id)))
    }
}

pub fn endpoint(n: usize) -> Endpoint {
    Endpoint::parse(&format!("http://gw-{}.example.com:80", n)).unwrap()
}
