//! TCP plumbing for a connection: socket split, the read loop and keep-alive.
//!
//! Exactly one read loop runs per connection, so there is never more than one
//! read in flight on a socket.

use crate::comms::Shared;
use crate::connection::info::{ApplicationLayerProtocol, ConnectionInfo, ConnectionState};
use crate::connection::Connection;
use crate::core::assembler::PacketAssembler;
use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::{self, reserved::UNMANAGED};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

impl Connection {
    /// Wrap a connected socket. The caller runs the handshake with the returned read half.
    pub(crate) fn from_stream(
        shared: &Arc<Shared>,
        stream: TcpStream,
        server_side: bool,
        alp: ApplicationLayerProtocol,
    ) -> Result<(Connection, OwnedReadHalf)> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        let info = ConnectionInfo::for_stream(remote, local, server_side, alp);
        Ok((Connection::new(shared, info, writer), reader))
    }
}

pub(crate) fn spawn_read_loop(conn: Connection, reader: OwnedReadHalf) {
    if conn.is_managed() {
        tokio::spawn(read_packets(conn, reader));
    } else {
        tokio::spawn(read_unmanaged(conn, reader));
    }
}

async fn read_packets(conn: Connection, mut reader: OwnedReadHalf) {
    let mut assembler = PacketAssembler::new(conn.settings().receive_buffer_size);
    let mut state_rx = conn.subscribe_state();

    let reason = loop {
        let read = tokio::select! {
            read = assembler.read_from(&mut reader) => read,
            _ = state_rx.wait_for(|s| *s == ConnectionState::Shutdown) => break None,
        };

        match read {
            Ok(0) => break Some("Remote peer closed the connection".to_string()),
            Ok(n) => {
                trace!(connection = %conn, bytes = n, "Read");
                conn.metrics().bytes_read(n as u64);
                if let Err(e) = drain(&conn, &mut assembler).await {
                    break Some(e.to_string());
                }
            }
            Err(e) => break Some(format!("Read failed: {e}")),
        }
    };

    if let Some(reason) = reason {
        conn.close(reason).await;
    }
    debug!(connection = %conn, "Read loop finished");
}

/// Process every complete packet in the assembler. Only fatal errors are returned.
async fn drain(conn: &Connection, assembler: &mut PacketAssembler) -> Result<()> {
    while let Some(packet) = assembler.try_extract_one(conn.codec())? {
        if let Err(e) = protocol::process_packet(conn, packet).await {
            if e.is_fatal_to_connection() {
                return Err(e);
            }
            warn!(connection = %conn, error = %e, "Failed to process packet");
        }
    }
    Ok(())
}

/// Unmanaged connections bypass framing: every read becomes one raw packet
async fn read_unmanaged(conn: Connection, mut reader: OwnedReadHalf) {
    let receive_size = conn.settings().receive_buffer_size;
    let mut buffer = BytesMut::with_capacity(receive_size);
    let mut state_rx = conn.subscribe_state();

    let reason = loop {
        if buffer.capacity() == 0 {
            buffer.reserve(receive_size);
        }
        let read = tokio::select! {
            read = reader.read_buf(&mut buffer) => read,
            _ = state_rx.wait_for(|s| *s == ConnectionState::Shutdown) => break None,
        };

        match read {
            Ok(0) => break Some("Remote peer closed the connection".to_string()),
            Ok(n) => {
                conn.metrics().bytes_read(n as u64);
                conn.metrics().packet_received();
                let chunk = buffer.split().freeze();
                protocol::route_application(&conn, Packet::raw(UNMANAGED, chunk));
            }
            Err(e) => break Some(format!("Read failed: {e}")),
        }
    };

    if let Some(reason) = reason {
        conn.close(reason).await;
    }
}

/// Write a zero byte whenever the connection has been idle for `interval`
pub(crate) fn spawn_keep_alive(conn: Connection, interval: Duration) {
    if interval.is_zero() || !conn.is_managed() {
        return;
    }
    tokio::spawn(async move {
        let mut state_rx = conn.subscribe_state();
        loop {
            let idle = conn.idle_for();
            if idle >= interval {
                if conn.write_chunks(&[&[0u8][..]]).await.is_err() {
                    break;
                }
                conn.metrics().keepalive_sent();
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval - idle) => {}
                _ = state_rx.wait_for(|s| *s == ConnectionState::Shutdown) => break,
            }
        }
        trace!(connection = %conn, "Keep-alive stopped");
    });
}
