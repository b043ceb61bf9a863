//! Receive confirmations, liveness probes and closing against a hand-driven peer

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{localhost, test_config, RawPeer};
use network_comms::core::pipeline::PipelineConfig;
use network_comms::{Connection, ConnectionInfo, ConnectionState, NetworkComms, ProtocolError};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// An instance connected to a raw peer that has completed the handshake
async fn connected_to_raw_peer() -> (NetworkComms, Connection, RawPeer) {
    let listener = TcpListener::bind(localhost()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let comms = NetworkComms::new(test_config()).unwrap();

    let accept = async {
        let mut peer = RawPeer::accept(&listener).await;
        peer.respond_to_handshake().await;
        peer
    };
    let (conn, peer) = tokio::join!(comms.get_or_create_connection(ConnectionInfo::new(addr)), accept);
    (comms, conn.unwrap(), peer)
}

#[tokio::test]
async fn test_missing_confirmation_times_out() {
    let (comms, conn, mut peer) = connected_to_raw_peer().await;
    let limit = comms.config().connection.confirmation_timeout;
    let confirmed = PipelineConfig::default().with_confirmation(true);

    let started = Instant::now();
    let (result, received) = tokio::join!(
        conn.send_object_with("Job", &17u64, &confirmed),
        peer.recv_type("Job")
    );
    let elapsed = started.elapsed();

    assert!(received.header().receive_confirmation_required());
    match result {
        Err(ProtocolError::ConfirmationTimeout(_)) => {}
        other => panic!("expected a confirmation timeout, got {other:?}"),
    }
    assert!(elapsed >= limit, "returned after {elapsed:?}");
    assert!(elapsed < limit + Duration::from_millis(1500), "returned after {elapsed:?}");
    assert_eq!(comms.metrics().confirmation_timeouts, 1);
}

#[tokio::test]
async fn test_confirmation_completes_send() {
    let (comms, conn, mut peer) = connected_to_raw_peer().await;
    let confirmed = PipelineConfig::default().with_confirmation(true);

    let respond = async {
        let packet = peer.recv_type("Job").await;
        peer.confirm(&packet).await;
        packet
    };
    let (result, packet) = tokio::join!(conn.send_object_with("Job", &17u64, &confirmed), respond);

    result.unwrap();
    let value: u64 = packet.decode(&confirmed, &peer.pipeline).unwrap();
    assert_eq!(value, 17);
    assert_eq!(comms.metrics().confirmation_timeouts, 0);
}

#[tokio::test]
async fn test_closing_fails_pending_confirmation() {
    let (_comms, conn, mut peer) = connected_to_raw_peer().await;
    let confirmed = PipelineConfig::default().with_confirmation(true);

    let close = async {
        peer.recv_type("Job").await;
        conn.close("closed while waiting").await;
    };
    let (result, ()) = tokio::join!(conn.send_object_with("Job", &1u64, &confirmed), close);

    assert!(matches!(result, Err(ProtocolError::ConfirmationTimeout(_))));
}

#[tokio::test]
async fn test_alive_probe() {
    let (_comms, conn, peer) = connected_to_raw_peer().await;

    let serving = tokio::spawn(peer.serve_alive_tests(Duration::from_millis(500)));
    assert!(conn.check_alive(Duration::from_millis(300)).await);
    let peer = serving.await.unwrap();

    // Nobody answers now
    assert!(!conn.check_alive(Duration::from_millis(100)).await);
    drop(peer);
}

#[tokio::test]
async fn test_establish_times_out_without_reply() {
    let listener = TcpListener::bind(localhost()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let comms = NetworkComms::new(test_config()).unwrap();

    let silent = async {
        let peer = RawPeer::accept(&listener).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        peer
    };
    let started = Instant::now();
    let (result, _peer) = tokio::join!(comms.get_or_create_connection(ConnectionInfo::new(addr)), silent);

    assert!(matches!(result, Err(ProtocolError::ConnectionSetup(_))));
    assert!(started.elapsed() >= comms.config().connection.establish_timeout);
    assert!(comms.connections().is_empty());
    assert_eq!(comms.metrics().handshakes_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_interrupts_write_to_stalled_peer() {
    let (_comms, conn, mut peer) = connected_to_raw_peer().await;

    // Far more than the socket buffers hold while the peer is not reading
    let blob = vec![7u8; 15 * 1024 * 1024];
    let sender = conn.clone();
    let sending = tokio::spawn(async move { sender.send_array("Blob", &blob).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!sending.is_finished(), "write should be stalled on the silent peer");

    let started = Instant::now();
    conn.close("stalled peer").await;
    assert!(started.elapsed() < Duration::from_millis(400), "close took {:?}", started.elapsed());
    assert_eq!(conn.state(), ConnectionState::Shutdown);

    let result = tokio::time::timeout(Duration::from_secs(2), sending)
        .await
        .expect("send still blocked after close")
        .unwrap();
    assert!(
        matches!(result, Err(ProtocolError::ConnectionClosed | ProtocolError::Communication(_))),
        "{result:?}"
    );

    // The socket really went away
    peer.expect_closed().await;
}
