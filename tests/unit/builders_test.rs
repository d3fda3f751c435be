//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_session_pool::builders::ServiceBuilder;
use prometheus_session_pool::config::ServiceConfig;
use prometheus_session_pool::infra::InMemoryLauncher;
use prometheus_session_pool::runtime::WarmPhase;

#[tokio::test]
async fn test_services_start_and_shutdown() {
    let launcher = Arc::new(InMemoryLauncher::new());
    let mut config = ServiceConfig::default();
    config.pool.pool_size = 2;
    let services = ServiceBuilder::new(config)
        .with_launcher(launcher.clone())
        .build()
        .expect("valid services");

    services.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(services.dispatcher.pre_warm_metrics().current.ready, 2);

    services.shutdown().await;
    assert_eq!(launcher.terminated(), 2);
    assert_eq!(services.dispatcher.pre_warm_status().status, WarmPhase::Stopped);
    assert_eq!(services.pool.metrics().current.total, 0);
}
