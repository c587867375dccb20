//! End-to-end scenarios against a real, in-process `BrokerServer`.
//!
//! Ground: `examples/original_source` test fixtures for the scenarios
//! (greeting/no-subscribers notice, fan-out, subscriber-drop
//! notification); `rcgen` self-signed certs and `#[tokio::test]` follow
//! the dev-dependency stack used elsewhere in the retrieval pack (e.g.
//! the `selium` manifest pairs `rcgen` with `quinn`/`rustls`).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker::client::publisher::PublisherClient;
use broker::client::subscriber::SubscriberClient;
use broker::config::Config;
use broker::server::BrokerServer;
use broker_common::Message;

fn test_tls_config() -> Arc<rustls::ServerConfig> {
    let generated =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
    let dir = tempfile::tempdir().expect("tempdir");
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, generated.cert.pem()).unwrap();
    std::fs::write(&key_path, generated.signing_key.serialize_pem()).unwrap();
    // Leak the tempdir so the files outlive this function; tests are
    // short-lived processes, so this isn't a real leak in practice.
    std::mem::forget(dir);
    broker::tls::load_server_config(&cert_path, &key_path).expect("loading generated TLS pair")
}

fn ephemeral_config() -> Config {
    let yaml = "publisherPort: 0\nsubscriberPort: 0\n";
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, yaml).unwrap();
    let config = Config::load(&path).expect("loading ephemeral-port config");
    std::mem::forget(dir);
    config
}

async fn start_broker() -> BrokerServer {
    let server = BrokerServer::new(ephemeral_config(), test_tls_config());
    server.start().await.expect("broker starts");
    server
}

fn capturing_receiver() -> (broker_common::MessageReceiver, Arc<Mutex<Vec<String>>>) {
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let for_callback = received.clone();
    let receiver: broker_common::MessageReceiver = Arc::new(move |message| {
        for_callback.lock().unwrap().push(message.text);
    });
    (receiver, received)
}

/// Scenario 1: a publisher that never sends anything still gets the
/// connect-time population notice, with no message of its own required
/// to provoke it.
#[tokio::test]
async fn publisher_gets_no_subscribers_notice_before_any_subscriber_connects() {
    let server = start_broker().await;
    let publisher_port = server.publisher_addr().unwrap().port();

    let mut publisher = PublisherClient::connect(publisher_port, Duration::from_secs(5), Duration::ZERO)
        .await
        .expect("publisher connects");

    let (receiver, received) = capturing_receiver();
    publisher.set_message_receiver(receiver).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        received.lock().unwrap().as_slice(),
        ["No subscribers are currently connected"]
    );

    publisher.close().await;
    server.shutdown().await.expect("clean shutdown");
}

/// Scenario 2/3 (greeting + fan-out half): a subscriber gets the greeting
/// first, then a message a publisher sends in afterwards.
#[tokio::test]
async fn subscriber_receives_greeting_then_fanned_out_message() {
    let server = start_broker().await;
    let publisher_port = server.publisher_addr().unwrap().port();
    let subscriber_port = server.subscriber_addr().unwrap().port();

    let mut subscriber = SubscriberClient::connect(subscriber_port, Duration::from_secs(5))
        .await
        .expect("subscriber connects");

    let (receiver, received) = capturing_receiver();
    subscriber.set_message_receiver(receiver).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut publisher = PublisherClient::connect(publisher_port, Duration::from_secs(5), Duration::ZERO)
        .await
        .expect("publisher connects");
    publisher
        .publish(Message::new("a fan-out message"))
        .await
        .expect("publish succeeds");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let messages = received.lock().unwrap().clone();
    assert_eq!(messages[0], "Hello from server! You're all set.");
    assert!(messages.contains(&"a fan-out message".to_string()));

    publisher.close().await;
    subscriber.close().await;
    server.shutdown().await.expect("clean shutdown");
}

/// Scenario 2/3 (population-notice half): an already-connected publisher
/// is told when a subscriber joins — the notice goes to publishers, not
/// to other subscribers.
#[tokio::test]
async fn publisher_is_notified_when_a_subscriber_joins() {
    let server = start_broker().await;
    let publisher_port = server.publisher_addr().unwrap().port();
    let subscriber_port = server.subscriber_addr().unwrap().port();

    let mut publisher = PublisherClient::connect(publisher_port, Duration::from_secs(5), Duration::ZERO)
        .await
        .expect("publisher connects");
    let (publisher_receiver, publisher_received) = capturing_receiver();
    publisher.set_message_receiver(publisher_receiver).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        publisher_received.lock().unwrap().as_slice(),
        ["No subscribers are currently connected"]
    );

    let mut subscriber = SubscriberClient::connect(subscriber_port, Duration::from_secs(5))
        .await
        .expect("subscriber connects");
    subscriber.set_message_receiver(Arc::new(|_| {})).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let messages = publisher_received.lock().unwrap().clone();
    assert!(messages.contains(&"New subscriber connected".to_string()));

    publisher.close().await;
    subscriber.close().await;
    server.shutdown().await.expect("clean shutdown");
}

/// Scenario 4: once the last subscriber disconnects, a connected
/// publisher is told no subscribers remain. Per spec section 4.F/7, a
/// dead subscriber is only discovered lazily, on the next send attempt
/// against it — so this drives that discovery with a publish after the
/// subscriber closes, rather than expecting instant detection.
#[tokio::test]
async fn publisher_is_notified_when_the_last_subscriber_leaves() {
    let server = start_broker().await;
    let publisher_port = server.publisher_addr().unwrap().port();
    let subscriber_port = server.subscriber_addr().unwrap().port();

    let mut publisher = PublisherClient::connect(publisher_port, Duration::from_secs(5), Duration::ZERO)
        .await
        .expect("publisher connects");
    let (publisher_receiver, publisher_received) = capturing_receiver();
    publisher.set_message_receiver(publisher_receiver).await;

    let mut subscriber = SubscriberClient::connect(subscriber_port, Duration::from_secs(5))
        .await
        .expect("subscriber connects");
    subscriber.set_message_receiver(Arc::new(|_| {})).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    subscriber.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Provokes the dispatcher into attempting a send against the now-dead
    // subscriber notifier, which is what actually triggers removal.
    publisher
        .publish(Message::new("provoke removal"))
        .await
        .expect("publish succeeds");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let messages = publisher_received.lock().unwrap().clone();
    assert_eq!(
        messages.last(),
        Some(&"No subscribers are currently connected".to_string())
    );

    publisher.close().await;
    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let server = start_broker().await;
    server.shutdown().await.expect("first shutdown");
    server.shutdown().await.expect("second shutdown is a no-op");
}
