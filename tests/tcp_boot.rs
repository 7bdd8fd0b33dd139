//! Full rendezvous over real TCP sockets on localhost.

use taproot::boot::bootstrap;
use taproot::config::{BootConfig, RoleConfig};
use taproot::locality::LocalityAddress;

fn quick_transport() -> taproot::transport::TcpTransportConfig {
    taproot::transport::TcpTransportConfig {
        connect_timeout_ms: 2_000,
        max_connect_retries: 3,
        connect_backoff_base_ms: 50,
        ..taproot::transport::TcpTransportConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn root_and_two_joiners_establish_the_address_space() {
    let mut root_config = BootConfig::default();
    root_config.local = LocalityAddress::new("127.0.0.1", 0);
    root_config.role = RoleConfig::Root { expected_peers: 2 };
    root_config.boot_timeout_ms = 10_000;
    root_config.transport = quick_transport();
    // The root is its own rendezvous point; the real port is known after
    // binding.
    root_config.bootstrap = LocalityAddress::new("127.0.0.1", 1);

    let root = bootstrap(root_config).await.unwrap();
    let root_endpoint = LocalityAddress::new("127.0.0.1", root.local_addr().port());

    let mut joiners = Vec::new();
    for _ in 0..2 {
        let mut config = BootConfig::default();
        config.local = LocalityAddress::new("127.0.0.1", 0);
        config.role = RoleConfig::Joining;
        config.bootstrap = root_endpoint.clone();
        config.boot_timeout_ms = 10_000;
        config.transport = quick_transport();
        joiners.push(bootstrap(config).await.unwrap());
    }

    for joiner in &joiners {
        joiner.complete().await.unwrap();
    }
    root.complete().await.unwrap();

    assert_eq!(root.protocol.registered_count().await, Some(2));
    let mut ids = Vec::new();
    for joiner in &joiners {
        ids.push(joiner.protocol.locality_id().await.unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    for joiner in joiners {
        joiner.shutdown().await.unwrap();
    }
    root.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joiner_times_out_when_no_root_exists() {
    let mut config = BootConfig::default();
    config.local = LocalityAddress::new("127.0.0.1", 0);
    config.role = RoleConfig::Joining;
    // Nothing listens here; registration fails at dial time.
    config.bootstrap = LocalityAddress::new("127.0.0.1", 1);
    config.boot_timeout_ms = 500;
    config.transport = taproot::transport::TcpTransportConfig {
        connect_timeout_ms: 100,
        max_connect_retries: 1,
        connect_backoff_base_ms: 10,
        ..taproot::transport::TcpTransportConfig::default()
    };

    // Registration surfaces the unreachable root during wiring.
    let err = bootstrap(config).await.unwrap_err();
    assert!(
        err.to_string().contains("register"),
        "unexpected error: {err:#}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn root_times_out_when_quorum_never_arrives() {
    let mut config = BootConfig::default();
    config.local = LocalityAddress::new("127.0.0.1", 0);
    config.role = RoleConfig::Root { expected_peers: 5 };
    config.bootstrap = LocalityAddress::new("127.0.0.1", 1);
    config.boot_timeout_ms = 200;

    let root = bootstrap(config).await.unwrap();
    let err = root.complete().await.unwrap_err();
    assert!(matches!(
        err,
        taproot::error::BootError::BootstrapTimeout { timeout_ms: 200 }
    ));
    root.shutdown().await.unwrap();
}
