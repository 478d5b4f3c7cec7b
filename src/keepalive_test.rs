use super::*;
use crate::config::ChannelConfig;
use crate::connection::ConnectionManager;
use crate::transport::test_helpers::{MockTransport, ServerEnd, next_server};
use tokio::time::timeout;

fn harness(ping_ms: u64) -> (ConnectionManager, mpsc::UnboundedReceiver<Delivery>, mpsc::UnboundedReceiver<ServerEnd>) {
    let config = ChannelConfig::new("ws://test/ws/completions")
        .with_reconnect_interval(Duration::from_millis(10))
        .with_ping_interval(Duration::from_millis(ping_ms));
    let (transport, accepted) = MockTransport::new();
    let (manager, events) = ConnectionManager::spawn(&config, transport);
    let deliveries = KeepaliveMonitor::spawn(events, manager.pinger(), config.ping_interval);
    (manager, deliveries, accepted)
}

async fn next_delivery(deliveries: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    timeout(Duration::from_secs(1), deliveries.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery stream ended")
}

#[tokio::test]
async fn pings_as_soon_as_socket_opens() {
    let (manager, _deliveries, mut accepted) = harness(1_000);
    manager.start();

    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));
}

#[tokio::test]
async fn pings_again_one_interval_after_pong() {
    let (manager, _deliveries, mut accepted) = harness(40);
    manager.start();
    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));

    let ponged_at = Instant::now();
    server.send_envelope(&Envelope::pong());
    assert_eq!(server.recv().await, Some(Envelope::ping()));
    assert!(ponged_at.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn no_ping_without_pong() {
    let (manager, _deliveries, mut accepted) = harness(20);
    manager.start();
    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));

    server.assert_silent(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn each_pong_rearms_the_same_timer() {
    let (manager, _deliveries, mut accepted) = harness(60);
    manager.start();
    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));

    server.send_envelope(&Envelope::pong());
    tokio::time::sleep(Duration::from_millis(30)).await;
    server.send_envelope(&Envelope::pong());

    assert_eq!(server.recv().await, Some(Envelope::ping()));
    server.assert_silent(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn pongs_are_never_forwarded() {
    let (manager, mut deliveries, mut accepted) = harness(1_000);
    manager.start();
    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));

    server.send_envelope(&Envelope::pong());
    server.send_envelope(&Envelope::stream_token("a"));
    server.send_envelope(&Envelope::pong());
    server.send_envelope(&Envelope::stream_ended());

    assert_eq!(next_delivery(&mut deliveries).await, Delivery::Message(Envelope::stream_token("a")));
    assert_eq!(next_delivery(&mut deliveries).await, Delivery::Message(Envelope::stream_ended()));
}

#[tokio::test]
async fn undecodable_messages_are_dropped() {
    let (manager, mut deliveries, mut accepted) = harness(1_000);
    manager.start();
    let server = next_server(&mut accepted).await;

    server.send_raw("not json");
    server.send_raw(r#"{"message_type":99}"#);
    server.send_raw(r#"{"message_type":4,"content":"x"}"#);
    server.send_envelope(&Envelope::stream_queued());

    assert_eq!(next_delivery(&mut deliveries).await, Delivery::Message(Envelope::stream_queued()));
}

#[tokio::test]
async fn close_forwards_error_and_disarms_timer() {
    let (manager, mut deliveries, mut accepted) = harness(50);
    manager.start();
    let mut server = next_server(&mut accepted).await;
    assert_eq!(server.recv().await, Some(Envelope::ping()));

    server.send_envelope(&Envelope::pong());
    drop(server);
    assert_eq!(next_delivery(&mut deliveries).await, Delivery::Error(TransportError::Closed));

    let mut next = next_server(&mut accepted).await;
    assert_eq!(next.recv().await, Some(Envelope::ping()));
    next.assert_silent(Duration::from_millis(150)).await;
}
