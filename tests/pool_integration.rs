//! Integration tests for the pool manager and failover path
//!
//! These tests drive the manager, pools, and health oracle together against
//! an injected in-memory transport, the way an RPC-issuing caller would.

mod common;

use common::{endpoint, MockChannel, MockConnector};
use std::sync::Arc;
use std::time::Duration;
use veripool::{
    ChannelManager, Config, Endpoint, HealthOracle, LazyChannelPool, PoolConfig, PoolError,
    ScoredHealthOracle,
};

fn manager_over(
    endpoints: Vec<Endpoint>,
    pool: PoolConfig,
) -> (
    Arc<ChannelManager>,
    Arc<MockConnector>,
    Arc<ScoredHealthOracle>,
) {
    let oracle = Arc::new(ScoredHealthOracle::new(endpoints).unwrap());
    let connector = Arc::new(MockConnector::new());
    let config = Config {
        pool,
        ..Default::default()
    };
    let manager = ChannelManager::new(oracle.clone(), connector.clone(), &config).unwrap();
    (manager, connector, oracle)
}

#[tokio::test]
async fn test_repeated_channel_calls_return_active_handles() {
    let pool = PoolConfig {
        max_pool_size: 3,
        min_idle_connections: 1,
        ..Default::default()
    };
    let (manager, _, _) = manager_over(vec![endpoint(1)], pool);

    for _ in 0..12 {
        let handle = manager.channel(&endpoint(1)).await.unwrap();
        assert!(handle.is_active());
    }
}

#[tokio::test]
async fn test_concurrent_first_access_builds_one_pool() {
    let pool = PoolConfig {
        max_pool_size: 4,
        min_idle_connections: 1,
        ..Default::default()
    };
    let (manager, connector, _) = manager_over(vec![endpoint(1)], pool);

    let mut joins = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        joins.push(tokio::spawn(
            async move { manager.channel(&endpoint(1)).await },
        ));
    }
    for join in joins {
        assert!(join.await.unwrap().is_ok());
    }

    // Exactly one eager pool of four channels; no duplicate construction
    assert_eq!(connector.built(), 4);
}

#[tokio::test]
async fn test_round_robin_cycles_through_pool() {
    let pool = PoolConfig {
        max_pool_size: 3,
        min_idle_connections: 1,
        ..Default::default()
    };
    let (manager, _, _) = manager_over(vec![endpoint(1)], pool);

    let h1 = manager.channel(&endpoint(1)).await.unwrap();
    let h2 = manager.channel(&endpoint(1)).await.unwrap();
    let h3 = manager.channel(&endpoint(1)).await.unwrap();
    let h4 = manager.channel(&endpoint(1)).await.unwrap();

    assert!(!Arc::ptr_eq(&h1, &h2));
    assert!(!Arc::ptr_eq(&h1, &h3));
    assert!(!Arc::ptr_eq(&h2, &h3));
    // Wraparound: the fourth call selects the first slot again
    assert!(Arc::ptr_eq(&h1, &h4));
}

#[tokio::test]
async fn test_failover_returns_first_live_endpoint() {
    let pool = PoolConfig {
        max_pool_size: 1,
        min_idle_connections: 0,
        ..Default::default()
    };
    let eps = vec![endpoint(1), endpoint(2), endpoint(3)];
    let (manager, connector, oracle) = manager_over(eps, pool);

    connector.refuse(&endpoint(1));

    let handle = manager.channel_with_failover().await.unwrap();
    assert_eq!(handle.endpoint(), &endpoint(2));
    assert!(handle.is_active());

    // The down endpoint was attempted once and its failure reported once
    assert_eq!(connector.attempts(&endpoint(1)), 1);
    assert!(oracle.score_of(&endpoint(1)).unwrap() < 100);
    // The healthy tail was never touched
    assert_eq!(connector.attempts(&endpoint(3)), 0);
}

#[tokio::test]
async fn test_failover_reordering_after_failures() {
    let pool = PoolConfig {
        max_pool_size: 1,
        min_idle_connections: 0,
        ..Default::default()
    };
    let eps = vec![endpoint(1), endpoint(2)];
    let (manager, connector, oracle) = manager_over(eps, pool);

    // Repeated failures demote the first endpoint below the second
    connector.refuse(&endpoint(1));
    for _ in 0..3 {
        let _ = manager.channel_with_failover().await.unwrap();
    }
    assert_eq!(oracle.ordered_endpoints()[0], endpoint(2));

    // Subsequent failover calls go straight to the healthy endpoint
    let before = connector.attempts(&endpoint(1));
    let handle = manager.channel_with_failover().await.unwrap();
    assert_eq!(handle.endpoint(), &endpoint(2));
    assert_eq!(connector.attempts(&endpoint(1)), before);
}

#[tokio::test]
async fn test_lifetime_eviction_is_transparent() {
    let pool = PoolConfig {
        max_pool_size: 2,
        min_idle_connections: 1,
        max_lifetime_ms: 20,
        ..Default::default()
    };
    let (manager, connector, _) = manager_over(vec![endpoint(1)], pool);

    let stale = manager.channel(&endpoint(1)).await.unwrap();
    drop(stale);
    assert_eq!(connector.built(), 2);

    tokio::time::sleep(Duration::from_millis(30)).await;

    // The health pass replaces both aged-out handles; callers see no error
    manager.run_health_pass().await;
    assert_eq!(connector.built(), 4);

    let handle = manager.channel(&endpoint(1)).await.unwrap();
    assert!(handle.is_active());
    assert!(handle.age() < Duration::from_millis(30));
}

#[tokio::test]
async fn test_cleanup_pass_respects_idle_floor() {
    let pool = PoolConfig {
        max_pool_size: 10,
        min_idle_connections: 2,
        idle_timeout_ms: 0,
        ..Default::default()
    };
    let (manager, _, _) = manager_over(vec![endpoint(1)], pool);

    manager.channel(&endpoint(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    manager.run_cleanup_pass().await;

    let status = manager.status().await;
    assert_eq!(status.idle, 2);
    assert_eq!(status.active, 0);
}

#[tokio::test]
async fn test_manager_close_idempotent() {
    let pool = PoolConfig {
        max_pool_size: 2,
        min_idle_connections: 1,
        ..Default::default()
    };
    let (manager, _, _) = manager_over(vec![endpoint(1)], pool);
    manager.channel(&endpoint(1)).await.unwrap();

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(manager.status().await.total_connections, 0);
    assert!(matches!(
        manager.channel(&endpoint(1)).await.unwrap_err(),
        PoolError::PoolClosed
    ));
}

#[tokio::test]
async fn test_status_counts_are_consistent() {
    let pool = PoolConfig {
        max_pool_size: 3,
        min_idle_connections: 1,
        ..Default::default()
    };
    let (manager, _, _) = manager_over(vec![endpoint(1), endpoint(2)], pool);

    let b1 = manager.channel(&endpoint(1)).await.unwrap();
    let b2 = manager.channel(&endpoint(2)).await.unwrap();

    let status = manager.status().await;
    assert_eq!(status.total_connections, 6);
    assert_eq!(status.active, 2);
    assert_eq!(status.idle, 4);
    assert_eq!(status.active + status.idle, status.total_connections);

    drop(b1);
    drop(b2);
    let status = manager.status().await;
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 6);
}

#[tokio::test]
async fn test_dead_transport_replaced_on_next_access() {
    let pool = PoolConfig {
        max_pool_size: 1,
        min_idle_connections: 0,
        ..Default::default()
    };
    let (manager, connector, _) = manager_over(vec![endpoint(1)], pool);

    let h1 = manager.channel(&endpoint(1)).await.unwrap();
    h1.transport()
        .as_any()
        .downcast_ref::<MockChannel>()
        .unwrap()
        .kill();

    let h2 = manager.channel(&endpoint(1)).await.unwrap();
    assert!(!Arc::ptr_eq(&h1, &h2));
    assert!(h2.is_active());
    assert_eq!(connector.built(), 2);
}

#[tokio::test]
async fn test_lazy_pool_cleanup_keeps_min_idle() {
    let connector = Arc::new(MockConnector::new());
    let config = PoolConfig {
        max_pool_size: 10,
        min_idle_connections: 2,
        idle_timeout_ms: 0,
        ..Default::default()
    };
    let pool =
        LazyChannelPool::new(endpoint(1), config, Default::default(), connector.clone()).unwrap();

    for n in 1..=5 {
        let handle = pool.connection_to(&endpoint(n)).await.unwrap();
        drop(handle);
    }
    tokio::time::sleep(Duration::from_millis(5)).await;

    pool.sweep_idle().await;

    let status = pool.status().await;
    assert_eq!(status.idle, 2);
    assert_eq!(status.total_connections, 2);
}

#[tokio::test]
async fn test_lazy_pool_configure_failure_keeps_previous() {
    let connector = Arc::new(MockConnector::new());
    let pool = LazyChannelPool::new(
        endpoint(1),
        PoolConfig::default(),
        Default::default(),
        connector,
    )
    .unwrap();

    let err = pool
        .configure(PoolConfig {
            max_pool_size: 0,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));
    assert_eq!(pool.status().await.max_pool_size, 10);
}

#[tokio::test]
async fn test_lazy_pool_switch_endpoint_drains_old_channels() {
    let connector = Arc::new(MockConnector::new());
    let pool = LazyChannelPool::new(
        endpoint(1),
        PoolConfig::default(),
        Default::default(),
        connector.clone(),
    )
    .unwrap();

    let old = pool.connection().await.unwrap();
    assert_eq!(old.endpoint(), &endpoint(1));
    drop(old);

    pool.switch_endpoint(endpoint(2)).await.unwrap();
    assert_eq!(pool.status().await.total_connections, 0);

    let fresh = pool.connection().await.unwrap();
    assert_eq!(fresh.endpoint(), &endpoint(2));
    assert_eq!(connector.built(), 2);
}
