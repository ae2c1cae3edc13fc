//! Test configuration helpers for building clients against fake archive servers

use ngas_client::{Config, EndpointConfig, NgasClient};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Endpoint pointing at a running fake archive
pub fn endpoint_of(server: &MockServer) -> EndpointConfig {
    let addr = server.address();
    EndpointConfig::new(addr.ip().to_string(), addr.port())
}

/// Endpoint on localhost where nothing is listening
pub fn dead_endpoint() -> EndpointConfig {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind throwaway socket");
    let port = listener.local_addr().expect("throwaway socket address").port();
    drop(listener);
    EndpointConfig::new("127.0.0.1", port)
}

/// Client configuration with short timeouts and a receiver on an ephemeral localhost port
///
/// Received files land in `storage`.
pub fn test_config(endpoints: Vec<EndpointConfig>, storage: &TempDir) -> Config {
    let mut config = Config::with_endpoints(endpoints);
    config.connection.connect_timeout = Duration::from_secs(2);
    config.connection.request_timeout = Duration::from_secs(10);

    config.receiver.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.receiver.port = 0;
    config.receiver.storage_dir = storage.path().join("incoming");
    config.receiver.advertised_host = Some("127.0.0.1".to_string());
    config.receiver.header_timeout = Duration::from_secs(5);
    config.receiver.ready_timeout = Duration::from_secs(5);
    config.receiver.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Create a test client for `endpoints` with its own temporary storage
///
/// The TempDir must be kept alive for the duration of the test.
pub fn create_test_client(endpoints: Vec<EndpointConfig>) -> (NgasClient, TempDir) {
    let storage = TempDir::new().expect("Failed to create temp dir");
    let client = NgasClient::new(test_config(endpoints, &storage)).expect("Failed to create client");
    (client, storage)
}

/// Same as [`create_test_client`] but with a custom cooldown
pub fn create_test_client_with_cooldown(
    endpoints: Vec<EndpointConfig>,
    cooldown: Duration,
) -> (NgasClient, TempDir) {
    let storage = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(endpoints, &storage);
    config.connection.cooldown = cooldown;
    let client = NgasClient::new(config).expect("Failed to create client");
    (client, storage)
}
