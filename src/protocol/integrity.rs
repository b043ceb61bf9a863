//! Payload checksum verification and the resend protocol.
//!
//! A packet whose payload does not match its `CheckSumHash` is dropped and
//! the sender is asked, once, to resend the cached copy. A mismatch on the
//! resent copy is an integrity fault and closes the connection.

use crate::connection::Connection;
use crate::core::header::compute_checksum;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::reserved::CHECKSUM_FAIL_RESEND;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accept,
    /// The packet was dropped and a resend has been requested
    ResendRequested,
}

pub(crate) async fn verify(conn: &Connection, packet: &Packet) -> Result<Verdict> {
    let Some(expected) = packet.header().checksum() else {
        return Ok(Verdict::Accept);
    };

    let matches = compute_checksum(packet.payload()) == expected;
    let was_resend = conn.take_requested_resend(expected);
    if matches {
        if was_resend {
            debug!(connection = %conn, hash = expected, "Resent packet verified");
        }
        return Ok(Verdict::Accept);
    }

    conn.metrics().checksum_failure();
    if was_resend {
        return Err(ProtocolError::CheckSum(format!(
            "{} ({} on {conn})",
            constants::ERR_RESEND_CHECKSUM,
            packet.packet_type()
        )));
    }

    let ceiling = conn.settings().resend_packet_ceiling;
    if packet.payload().len() > ceiling {
        return Err(ProtocolError::CheckSum(format!(
            "Checksum mismatch on a {} byte '{}' payload, above the {ceiling} byte resend ceiling",
            packet.payload().len(),
            packet.packet_type()
        )));
    }

    warn!(connection = %conn, packet_type = packet.packet_type(), "Checksum mismatch, requesting resend");
    let hash = expected.to_string();
    conn.record_requested_resend(&hash);
    conn.send_internal(CHECKSUM_FAIL_RESEND, &hash).await?;
    conn.metrics().resend_requested();
    Ok(Verdict::ResendRequested)
}

/// Answer a resend request with the cached frame, written verbatim
pub(crate) async fn handle_resend_request(conn: &Connection, hash: &str) -> Result<()> {
    match conn.cached_frame(hash) {
        Some(frame) => {
            conn.write_frame(&frame).await?;
            conn.metrics().resend_served();
            debug!(connection = %conn, hash, "Packet resent");
        }
        None => warn!(connection = %conn, hash, "Resend requested for a packet no longer cached"),
    }
    Ok(())
}
