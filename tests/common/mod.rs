//! Shared helpers for integration tests.
//!
//! `RawPeer` speaks the wire protocol by hand so tests can inject corrupted
//! payloads, stay silent, or answer selectively.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use bytes::Bytes;
use network_comms::connection::info::{ConnectionType, NetworkId};
use network_comms::core::assembler::PacketAssembler;
use network_comms::core::codec::PacketCodec;
use network_comms::core::packet::Packet;
use network_comms::core::pipeline::{PipelineConfig, TransformPipeline};
use network_comms::protocol::reserved::{AliveTest, ALIVE_TEST, CONFIRMATION, CONNECTION_SETUP};
use network_comms::{ConnectionSetupInfo, NetworkComms, NetworkConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Config with short timeouts and a small worker pool
pub fn test_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|config| {
        config.connection.establish_timeout = Duration::from_secs(2);
        config.connection.confirmation_timeout = Duration::from_millis(500);
        config.connection.alive_test_timeout = Duration::from_millis(200);
        config.connection.keep_alive_interval = Duration::ZERO;
        config.dispatch.worker_count = 2;
    })
}

/// A listening instance and its bound address
pub async fn listening_instance(config: NetworkConfig) -> (NetworkComms, SocketAddr) {
    let comms = NetworkComms::new(config).unwrap();
    let addr = comms.start_listening_on(localhost()).await.unwrap();
    (comms, addr)
}

pub struct RawPeer {
    pub stream: TcpStream,
    pub codec: PacketCodec,
    pub assembler: PacketAssembler,
    pub pipeline: TransformPipeline,
    pub id: NetworkId,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self::wrap(TcpStream::connect(addr).await.unwrap())
    }

    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(RECV_TIMEOUT, listener.accept())
            .await
            .expect("no incoming connection")
            .unwrap();
        Self::wrap(stream)
    }

    fn wrap(stream: TcpStream) -> Self {
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            codec: PacketCodec::default(),
            assembler: PacketAssembler::new(8192),
            pipeline: TransformPipeline::new(),
            id: NetworkId::new(),
        }
    }

    pub fn setup_info(&self, listen_endpoint: Option<SocketAddr>) -> ConnectionSetupInfo {
        ConnectionSetupInfo {
            network_identifier: self.id,
            connection_type: ConnectionType::Tcp,
            listen_endpoint,
        }
    }

    /// Packet encoded the way the protocol encodes its reserved packets
    pub fn internal<T: Serialize>(&self, packet_type: &str, value: &T) -> Packet {
        Packet::build(packet_type, value, &PipelineConfig::internal(), &self.pipeline).unwrap()
    }

    pub fn decode_internal<T: DeserializeOwned>(&self, packet: &Packet) -> T {
        packet
            .decode(&PipelineConfig::internal(), &self.pipeline)
            .unwrap()
    }

    pub async fn send(&mut self, packet: &Packet) {
        let frame = self.codec.frame(packet).unwrap();
        self.send_bytes(&frame.to_bytes()).await;
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Next packet, or `None` once the remote side has closed
    pub async fn recv(&mut self) -> Option<Packet> {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("timed out waiting for a packet")
    }

    /// `Err(())` on timeout
    pub async fn recv_within(&mut self, limit: Duration) -> Result<Option<Packet>, ()> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            match self.assembler.try_extract_one(&self.codec) {
                Ok(Some(packet)) => return Ok(Some(packet)),
                Ok(None) => {}
                Err(_) => return Ok(None),
            }
            let read = tokio::time::timeout_at(deadline, self.assembler.read_from(&mut self.stream))
                .await
                .map_err(|_| ())?;
            match read {
                Ok(0) | Err(_) => return Ok(None),
                Ok(_) => {}
            }
        }
    }

    /// Next packet of `packet_type`, answering alive tests on the way
    pub async fn recv_type(&mut self, packet_type: &str) -> Packet {
        loop {
            let packet = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("connection closed while waiting for {packet_type}"));
            if packet.packet_type() == packet_type {
                return packet;
            }
            self.answer_if_alive_test(&packet).await;
        }
    }

    /// Client side of the handshake; returns the remote descriptor
    pub async fn handshake(&mut self, listen_endpoint: Option<SocketAddr>) -> ConnectionSetupInfo {
        let setup = self.internal(CONNECTION_SETUP, &self.setup_info(listen_endpoint));
        self.send(&setup).await;
        let reply = self.recv_type(CONNECTION_SETUP).await;
        self.decode_internal(&reply)
    }

    /// Server side of the handshake
    pub async fn respond_to_handshake(&mut self) -> ConnectionSetupInfo {
        let request = self.recv_type(CONNECTION_SETUP).await;
        let remote: ConnectionSetupInfo = self.decode_internal(&request);
        let reply = self.internal(CONNECTION_SETUP, &self.setup_info(None));
        self.send(&reply).await;
        remote
    }

    pub async fn confirm(&mut self, packet: &Packet) {
        let seq = packet.header().sequence_number().expect("no sequence number");
        let confirmation = self.internal(CONFIRMATION, &seq);
        self.send(&confirmation).await;
    }

    async fn answer_if_alive_test(&mut self, packet: &Packet) {
        if packet.packet_type() == ALIVE_TEST {
            if let AliveTest::Request(id) = self.decode_internal(packet) {
                let response = self.internal(ALIVE_TEST, &AliveTest::Response(id));
                self.send(&response).await;
            }
        }
    }

    /// Answer alive tests for `duration`, then hand the peer back
    pub async fn serve_alive_tests(mut self, duration: Duration) -> Self {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_within(remaining).await {
                Ok(Some(packet)) => self.answer_if_alive_test(&packet).await,
                Ok(None) | Err(()) => return self,
            }
        }
    }

    /// Drain until the remote side closes the connection
    pub async fn expect_closed(&mut self) {
        loop {
            match self.recv_within(RECV_TIMEOUT).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(()) => panic!("connection still open"),
            }
        }
    }

    /// True if nothing arrives within `limit`
    pub async fn is_quiet_for(&mut self, limit: Duration) -> bool {
        matches!(self.recv_within(limit).await, Err(()))
    }
}

/// Poll `condition` until it holds, failing after `RECV_TIMEOUT`
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn static_payload(data: &'static str) -> Bytes {
    Bytes::from_static(data.as_bytes())
}
