//! Endpoint failover, cooldown and round-robin against fake archives

mod common;

use common::{
    create_test_client, create_test_client_with_cooldown, dead_endpoint, drain_events,
    endpoint_of, fake_archive, received_commands,
};
use ngas_client::{EndpointConfig, Error, Event};
use std::time::Duration;
use wiremock::MockServer;

fn failed_endpoints(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::EndpointFailed { .. }))
        .count()
}

#[tokio::test]
async fn unreachable_endpoint_fails_over_to_the_next() {
    let server = fake_archive().await;
    let dead = dead_endpoint();
    let (client, _storage) = create_test_client(vec![dead.clone(), endpoint_of(&server)]);
    let mut events = client.events();

    let status = client.status().await.unwrap();

    assert!(status.ok());
    assert_eq!(received_commands(&server).await, vec!["STATUS"]);
    match drain_events(&mut events).as_slice() {
        [Event::EndpointFailed { endpoint, .. }, Event::CommandCompleted { http_code: 200, .. }] => {
            assert_eq!(endpoint.port, dead.port);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn failed_endpoint_is_skipped_during_cooldown() {
    let server = fake_archive().await;
    let (client, _storage) = create_test_client(vec![dead_endpoint(), endpoint_of(&server)]);
    let mut events = client.events();

    client.status().await.unwrap();
    assert_eq!(failed_endpoints(&drain_events(&mut events)), 1);

    client.status().await.unwrap();
    client.status().await.unwrap();
    assert_eq!(failed_endpoints(&drain_events(&mut events)), 0);
    assert_eq!(received_commands(&server).await.len(), 3);
}

#[tokio::test]
async fn failed_endpoint_is_retried_after_cooldown() {
    let server = fake_archive().await;
    let (client, _storage) = create_test_client_with_cooldown(
        vec![dead_endpoint(), endpoint_of(&server)],
        Duration::from_millis(300),
    );
    let mut events = client.events();

    client.status().await.unwrap();
    client.status().await.unwrap();
    assert_eq!(failed_endpoints(&drain_events(&mut events)), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    client.status().await.unwrap();
    assert_eq!(failed_endpoints(&drain_events(&mut events)), 1);
}

#[tokio::test]
async fn successive_commands_rotate_between_healthy_endpoints() {
    let first = fake_archive().await;
    let second = fake_archive().await;
    let (client, _storage) = create_test_client_with_cooldown(
        vec![endpoint_of(&first), endpoint_of(&second)],
        Duration::ZERO,
    );

    for _ in 0..3 {
        assert!(client.status().await.unwrap().ok());
    }

    assert_eq!(received_commands(&first).await.len(), 2);
    assert_eq!(received_commands(&second).await.len(), 1);
}

#[tokio::test]
async fn all_endpoints_down_reports_no_server_available() {
    let (client, _storage) = create_test_client(vec![dead_endpoint(), dead_endpoint()]);

    let err = client.status().await.unwrap_err();
    assert_eq!(err.error_code(), "no_server_available");
    assert!(matches!(
        err,
        Error::NoServerAvailable {
            attempted: 2,
            cooling_down: 0
        }
    ));

    // Both are now cooling down, so nothing is attempted
    let err = client.status().await.unwrap_err();
    assert!(matches!(
        err,
        Error::NoServerAvailable {
            attempted: 0,
            cooling_down: 2
        }
    ));
}

#[tokio::test]
async fn endpoint_coming_back_emits_recovery() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (client, _storage) = create_test_client_with_cooldown(
        vec![EndpointConfig::new("127.0.0.1", port)],
        Duration::ZERO,
    );
    let mut events = client.events();

    assert_eq!(
        client.status().await.unwrap_err().error_code(),
        "no_server_available"
    );

    let listener = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    let server = MockServer::builder().listener(listener).start().await;
    wiremock::Mock::given(wiremock::matchers::any())
        .respond_with(wiremock::ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(client.status().await.unwrap().ok());
    let events = drain_events(&mut events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::EndpointRecovered { endpoint } if endpoint.port == port))
    );
}

#[test]
fn empty_endpoint_list_is_a_config_error() {
    let err = ngas_client::NgasClient::from_endpoints(Vec::new()).unwrap_err();
    assert_eq!(err.error_code(), "config_error");
}
