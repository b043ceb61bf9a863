//! Payload checksum failures and the single-resend recovery path

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use bytes::Bytes;
use common::{eventually, listening_instance, test_config, RawPeer, RECV_TIMEOUT};
use network_comms::core::pipeline::PipelineConfig;
use network_comms::protocol::reserved::CHECKSUM_FAIL_RESEND;
use network_comms::{NetworkComms, NetworkConfig, Packet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn checksum_config() -> NetworkConfig {
    let mut config = test_config();
    config.connection.enable_checksum_validation = true;
    config
}

/// A correctly hashed packet and a copy whose payload no longer matches the hash
fn good_and_corrupted(peer: &RawPeer, text: &str) -> (Packet, Packet) {
    let good = Packet::build("Data", text, &PipelineConfig::default(), &peer.pipeline)
        .unwrap()
        .with_checksum();

    let mut corrupted = good.payload().to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    let bad = Packet::new(good.header().clone(), Bytes::from(corrupted));
    (good, bad)
}

async fn checksum_server() -> (NetworkComms, RawPeer, mpsc::UnboundedReceiver<String>) {
    let (server, addr) = listening_instance(checksum_config()).await;
    let (tx, rx) = mpsc::unbounded_channel();
    server
        .append_global_handler("Data", move |_, _, text: String| {
            let tx = tx.clone();
            async move {
                tx.send(text).unwrap();
                Ok(())
            }
        })
        .unwrap();

    let mut peer = RawPeer::connect(addr).await;
    let remote = peer.handshake(None).await;
    assert_eq!(remote.network_identifier, server.network_identifier());
    (server, peer, rx)
}

#[tokio::test]
async fn test_corrupted_packet_is_resent_once() {
    let (server, mut peer, mut rx) = checksum_server().await;
    let (good, bad) = good_and_corrupted(&peer, "checksummed payload");
    let hash = good.header().checksum().unwrap().to_string();

    peer.send(&bad).await;

    let request = peer.recv_type(CHECKSUM_FAIL_RESEND).await;
    let requested: String = peer.decode_internal(&request);
    assert_eq!(requested, hash);

    // The corrupted copy never reaches a handler
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    peer.send(&good).await;
    let delivered = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered, "checksummed payload");

    // Only one resend request was issued
    assert!(peer.is_quiet_for(Duration::from_millis(200)).await);

    let metrics = server.metrics();
    assert_eq!(metrics.resends_requested, 1);
    assert_eq!(metrics.checksum_failures, 1);
    assert_eq!(server.connections().len(), 1);
}

#[tokio::test]
async fn test_corrupted_resend_closes_connection() {
    let (server, mut peer, mut rx) = checksum_server().await;
    let (_, bad) = good_and_corrupted(&peer, "never delivered");

    peer.send(&bad).await;
    peer.recv_type(CHECKSUM_FAIL_RESEND).await;

    peer.send(&bad).await;
    peer.expect_closed().await;

    assert!(rx.try_recv().is_err());
    let metrics = server.metrics();
    assert_eq!(metrics.checksum_failures, 2);
    assert_eq!(metrics.resends_requested, 1);
    assert!(server.connections().is_empty());
}

#[tokio::test]
async fn test_oversized_corrupted_packet_is_not_resent() {
    let mut config = checksum_config();
    config.connection.resend_packet_ceiling = 16;
    let (server, addr) = listening_instance(config).await;

    let mut peer = RawPeer::connect(addr).await;
    peer.handshake(None).await;

    let (_, bad) = good_and_corrupted(&peer, "a payload well above the sixteen byte ceiling");
    peer.send(&bad).await;
    peer.expect_closed().await;

    assert_eq!(server.metrics().resends_requested, 0);
}

#[tokio::test]
async fn test_resend_served_from_cache() {
    let (server, addr) = listening_instance(checksum_config()).await;
    let mut peer = RawPeer::connect(addr).await;
    peer.handshake(None).await;

    let conn = server.connections().pop().unwrap();
    conn.send_object("Data", "cached").await.unwrap();

    let original = peer.recv_type("Data").await;
    let hash = original.header().checksum().unwrap().to_string();

    let request = peer.internal(CHECKSUM_FAIL_RESEND, &hash);
    peer.send(&request).await;

    let resent = peer.recv_type("Data").await;
    assert_eq!(resent.payload(), original.payload());
    assert_eq!(resent.header().checksum(), Some(hash.as_str()));

    eventually(|| server.metrics().resends_served == 1).await;
}
