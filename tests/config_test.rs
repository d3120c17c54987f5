//! Configuration loading tests

use veripool::config::{load_from_yaml, Config, PoolConfig};
use veripool::endpoint::Endpoint;

#[test]
fn test_yaml_round_trip() {
    let yaml = r#"
gateways:
  production:
    endpoints:
      - https://gw-eu.example.com:9443
      - https://gw-us.example.com:9443
      - https://gw-ap.example.com:9443
  staging:
    endpoints:
      - http://gw-staging.example.com:8080

default_gateway: production

pool:
  max_pool_size: 6
  min_idle_connections: 2
  connect_timeout_ms: 2500
  idle_timeout_ms: 120000
  max_lifetime_ms: 600000

maintenance:
  health_check_interval_secs: 15
"#;

    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.gateways.len(), 2);

    let production = config.get_gateway(None).unwrap();
    assert_eq!(production.endpoints.len(), 3);

    let staging = config.get_gateway(Some("staging")).unwrap();
    assert_eq!(staging.endpoints.len(), 1);

    assert_eq!(config.pool.max_pool_size, 6);
    assert_eq!(config.pool.idle_timeout_ms, 120_000);
    assert!(config.pool.validate().is_ok());

    // Partial maintenance section keeps the other default
    assert_eq!(config.maintenance.health_check_interval_secs, 15);
    assert_eq!(config.maintenance.cleanup_interval_secs, 60);
}

#[test]
fn test_configured_endpoints_parse() {
    let yaml = r#"
gateways:
  default:
    endpoints:
      - https://gw-eu.example.com:9443
      - https://gw-us.example.com
"#;

    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let gateway = config.get_gateway(None).unwrap();

    let endpoints: Vec<Endpoint> = gateway
        .endpoints
        .iter()
        .map(|url| Endpoint::parse(url).unwrap())
        .collect();

    assert_eq!(endpoints[0].port(), 9443);
    // Default port derived from the secure scheme
    assert_eq!(endpoints[1].port(), 443);
    assert!(endpoints[1].use_tls());
}

#[test]
fn test_invalid_pool_section_rejected_at_load() {
    let dir = std::env::temp_dir().join("veripool-config-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("invalid.yaml");
    std::fs::write(
        &path,
        r#"
gateways:
  default:
    endpoints:
      - http://gw-1.example.com

pool:
  max_pool_size: 0
"#,
    )
    .unwrap();

    let err = load_from_yaml(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid pool configuration"));
}

#[test]
fn test_defaults_match_documented_surface() {
    let pool = PoolConfig::default();
    assert_eq!(pool.max_pool_size, 10);
    assert_eq!(pool.min_idle_connections, 2);
    assert_eq!(pool.connect_timeout_ms, 5_000);
    assert_eq!(pool.idle_timeout_ms, 300_000);
    assert_eq!(pool.max_lifetime_ms, 1_800_000);
}
