//! End-to-end facade scenarios over the in-memory relay and engine

use std::sync::Arc;
use std::time::Duration;

use peerlink::mock::{MemoryRelay, MockNetwork};
use peerlink::relay::{RelayConnector, RelayLink as _};
use peerlink::{
    ClientConfig, ClientError, NegotiationError, PeerClient, SdpKind, SessionDescription,
    SessionState,
};
use tokio::time::timeout;

fn config(local: &str, remote: &str) -> ClientConfig {
    ClientConfig::new(local, remote)
}

async fn wait_for_state<E: peerlink::PeerEngine + 'static>(
    client: &PeerClient<E>,
    state: SessionState,
) -> bool {
    for _ in 0..100 {
        if client.state().await == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn offer_answer_establishes_both_sides() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector_a: Arc<dyn RelayConnector> = relay.clone();
    let connector_b: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector_a, network.engine("me"));
    let b = PeerClient::with_parts(config("you", "me"), connector_b, network.engine("you"));

    a.connect().await.unwrap();
    b.connect().await.unwrap();

    a.call().await.unwrap();

    assert!(wait_for_state(&a, SessionState::Established).await);
    assert!(wait_for_state(&b, SessionState::Established).await);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn messages_flow_once_established_and_drop_before() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector_a: Arc<dyn RelayConnector> = relay.clone();
    let connector_b: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector_a, network.engine("me"));
    let b = PeerClient::with_parts(config("you", "me"), connector_b, network.engine("you"));

    a.connect().await.unwrap();
    b.connect().await.unwrap();

    let mut b_incoming = b.take_incoming().await.unwrap();

    // best-effort send with no channel open yet: no error, no delivery
    a.send_message("too early").await.unwrap();

    a.call().await.unwrap();
    assert!(wait_for_state(&a, SessionState::Established).await);
    assert!(wait_for_state(&b, SessionState::Established).await);

    assert!(b_incoming.try_recv().is_err());

    a.send_message("text message").await.unwrap();
    let received = timeout(Duration::from_secs(1), b_incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, "text message");

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn second_call_is_a_usage_error() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector, network.engine("me"));
    a.connect().await.unwrap();

    a.call().await.unwrap();
    let err = a.call().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Negotiation(NegotiationError::AlreadyActive(_))
    ));

    a.close().await;
}

#[tokio::test]
async fn stale_answer_leaves_state_untouched() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector_a: Arc<dyn RelayConnector> = relay.clone();
    let connector_raw: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector_a, network.engine("me"));
    a.connect().await.unwrap();

    // a bare link impersonating the remote side, no negotiation behind it
    let raw = connector_raw.connect(&config("you", "me")).await.unwrap();
    let stray = SessionDescription::new("v=0 stray", SdpKind::Answer);
    let payload = peerlink::encode(&stray, a_encoding()).unwrap();
    raw.send("me", &payload).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.state().await, SessionState::Idle);

    a.close().await;
}

fn a_encoding() -> peerlink::PayloadEncoding {
    ClientConfig::default().encoding
}

#[tokio::test]
async fn malformed_payload_does_not_kill_the_loop() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector_a: Arc<dyn RelayConnector> = relay.clone();
    let connector_b: Arc<dyn RelayConnector> = relay.clone();
    let connector_raw: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector_a, network.engine("me"));
    let b = PeerClient::with_parts(config("you", "me"), connector_b, network.engine("you"));

    a.connect().await.unwrap();
    b.connect().await.unwrap();

    let raw = connector_raw.connect(&config("intruder", "me")).await.unwrap();
    raw.send("me", "this is not a payload").await.unwrap();

    // the loop survives and the session still negotiates
    b.call().await.unwrap();
    assert!(wait_for_state(&a, SessionState::Established).await);
    assert!(wait_for_state(&b, SessionState::Established).await);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn glare_is_rejected_on_both_sides() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector_a: Arc<dyn RelayConnector> = relay.clone();
    let connector_b: Arc<dyn RelayConnector> = relay.clone();

    let a = PeerClient::with_parts(config("me", "you"), connector_a, network.engine("me"));
    let b = PeerClient::with_parts(config("you", "me"), connector_b, network.engine("you"));

    a.connect().await.unwrap();
    b.connect().await.unwrap();

    a.call().await.unwrap();
    b.call().await.unwrap();

    // both offers are rejected as protocol violations; neither side moves on
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.state().await, SessionState::OfferSent);
    assert_eq!(b.state().await, SessionState::OfferSent);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_releases_once() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector: Arc<dyn RelayConnector> = relay.clone();
    let engine = network.engine("me");

    let a = PeerClient::with_parts(config("me", "you"), connector, engine.clone());
    a.connect().await.unwrap();

    a.close().await;
    a.close().await;
    assert_eq!(engine.close_calls(), 1);

    assert!(matches!(
        a.send_message("late").await.unwrap_err(),
        ClientError::Negotiation(NegotiationError::Closed)
    ));
    assert!(matches!(
        a.call().await.unwrap_err(),
        ClientError::Negotiation(NegotiationError::Closed)
    ));
}

#[tokio::test]
async fn media_tracks_attach_and_inbound_events_surface() {
    let relay = MemoryRelay::new();
    let network = MockNetwork::new();
    let connector: Arc<dyn RelayConnector> = relay.clone();
    let engine = network.engine("me");

    let mut cfg = config("me", "you");
    cfg.media_enabled = true;

    let a = PeerClient::with_parts(cfg, connector, engine.clone());
    a.connect().await.unwrap();

    a.add_track("camera".to_string()).await.unwrap();
    assert_eq!(engine.attached_tracks().await, vec!["camera".to_string()]);

    let mut tracks = a.take_tracks().await.unwrap();
    engine
        .push_remote_track(peerlink::TrackInfo {
            id: "remote-cam".to_string(),
            kind: "video".to_string(),
        })
        .await;
    let event = timeout(Duration::from_secs(1), tracks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.id, "remote-cam");
    assert_eq!(event.kind, "video");

    a.close().await;
}
