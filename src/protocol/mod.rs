//! # Protocol Layer
//!
//! Everything that happens to a packet after the assembler has produced it.
//!
//! ## Components
//! - **Reserved**: packet types owned by the protocol
//! - **Handshake**: connection setup and duplicate resolution
//! - **Integrity**: checksum verification and resend requests
//! - **Handlers**: registry of typed application callbacks
//! - **Dispatcher**: priority worker pool running those callbacks
//!
//! ## Receive order
//! 1. Checksum verification (may drop the packet and request a resend)
//! 2. Receive confirmation, if the sender asked for one
//! 3. Reserved types are handled inline on the read loop
//! 4. Everything else goes to the dispatcher, connection handlers first

pub mod dispatcher;
pub mod handlers;
pub mod handshake;
pub(crate) mod integrity;
pub mod reserved;

use crate::connection::info::ConnectionState;
use crate::connection::Connection;
use crate::core::assembler::PacketAssembler;
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::core::pipeline::PipelineConfig;
use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use dispatcher::DispatchJob;
use integrity::Verdict;
use reserved::{AliveTest, ReservedPacketType, ALIVE_TEST, CONFIRMATION};
use tracing::{debug, trace, warn};

/// Entry point for every packet extracted on a managed connection
pub(crate) async fn process_packet(conn: &Connection, packet: Packet) -> Result<()> {
    conn.metrics().packet_received();
    trace!(connection = %conn, packet_type = packet.packet_type(), size = packet.payload().len(), "Packet received");

    if integrity::verify(conn, &packet).await? == Verdict::ResendRequested {
        return Ok(());
    }

    if ReservedPacketType::from_name(packet.packet_type()) == Some(ReservedPacketType::NestedPacket) {
        for inner in unwrap_nested(conn.codec(), packet.payload())? {
            handle(conn, inner).await?;
        }
        return Ok(());
    }

    handle(conn, packet).await
}

async fn handle(conn: &Connection, packet: Packet) -> Result<()> {
    let reserved = ReservedPacketType::from_name(packet.packet_type());

    if packet.header().receive_confirmation_required() && reserved != Some(ReservedPacketType::Confirmation) {
        if let Some(seq) = packet.header().sequence_number() {
            if let Err(e) = conn.send_internal(CONFIRMATION, &seq).await {
                debug!(connection = %conn, error = %e, "Receive confirmation could not be sent");
            }
        }
    }

    let internal = PipelineConfig::internal();
    match reserved {
        Some(ReservedPacketType::Confirmation) => {
            let seq: u64 = packet.decode(&internal, conn.pipeline())?;
            conn.complete_confirmation(seq);
            Ok(())
        }
        Some(ReservedPacketType::CheckSumFailResend) => {
            let hash: String = packet.decode(&internal, conn.pipeline())?;
            integrity::handle_resend_request(conn, &hash).await
        }
        Some(ReservedPacketType::ConnectionSetup) => handshake::handle_setup(conn, &packet).await,
        Some(ReservedPacketType::AliveTest) => {
            match packet.decode::<AliveTest>(&internal, conn.pipeline())? {
                AliveTest::Request(id) => conn.send_internal(ALIVE_TEST, &AliveTest::Response(id)).await,
                AliveTest::Response(id) => {
                    conn.complete_alive(id);
                    Ok(())
                }
            }
        }
        Some(ReservedPacketType::NestedPacket) => {
            warn!(connection = %conn, "Nested packet inside a nested packet dropped");
            Ok(())
        }
        Some(ReservedPacketType::Unmanaged) | None => {
            route_application(conn, packet);
            Ok(())
        }
    }
}

/// Parse the complete frames carried in a `NestedPacket` payload
pub(crate) fn unwrap_nested(codec: &PacketCodec, payload: &Bytes) -> Result<Vec<Packet>> {
    let mut assembler = PacketAssembler::new(0);
    assembler.append(payload.clone());

    let mut packets = Vec::new();
    while let Some(packet) = assembler.try_extract_one(codec)? {
        packets.push(packet);
    }
    if assembler.buffered() > 0 {
        return Err(ProtocolError::Serialization(format!(
            "Nested packet has {} trailing bytes",
            assembler.buffered()
        )));
    }
    Ok(packets)
}

/// Hand an application packet to reply waiters and the dispatcher
pub(crate) fn route_application(conn: &Connection, packet: Packet) {
    if conn.state() != ConnectionState::Established {
        warn!(connection = %conn, packet_type = packet.packet_type(), "Packet received before setup completed, dropped");
        return;
    }

    let replied = conn.deliver_reply(&packet);
    let Some(shared) = conn.shared() else {
        return;
    };

    let handler_sets: Vec<_> = [
        conn.handlers().snapshot(packet.packet_type()),
        shared.global_handlers.snapshot(packet.packet_type()),
    ]
    .into_iter()
    .flatten()
    .collect();

    let Some(first) = handler_sets.first() else {
        if !replied {
            conn.metrics().unknown_packet();
            let error = ProtocolError::UnexpectedPacketType(format!(
                "No handler registered for '{}' from {conn}",
                packet.packet_type()
            ));
            if conn.settings().ignore_unknown_packet_types {
                debug!(error = %error, "Packet ignored");
            } else {
                warn!(error = %error, "Packet dropped");
            }
        }
        return;
    };

    shared.dispatcher.enqueue(DispatchJob {
        priority: first.config.priority,
        packet,
        connection: conn.clone(),
        handler_sets,
    });
}
