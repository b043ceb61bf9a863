//! Connection setup handshake.
//!
//! The connecting side sends a `ConnectionSetup` packet carrying its
//! [`ConnectionSetupInfo`]; the accepting side records it and replies with its
//! own. Each side waits, bounded by the establish timeout, for the peer's
//! descriptor before the connection counts as established.
//!
//! Duplicate resolution:
//! - same peer identifier: the newest connection wins, the old one is closed
//! - same remote and local endpoint pair: the existing connection is probed
//!   with an alive test; if it answers, the newcomer is rejected, otherwise
//!   the existing one is closed and replaced

use crate::comms::Shared;
use crate::connection::info::{ConnectionState, ConnectionType, NetworkId};
use crate::connection::{tcp, Connection};
use crate::core::packet::Packet;
use crate::core::pipeline::PipelineConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::reserved::CONNECTION_SETUP;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Attempts to claim an endpoint pair before giving up
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// What each side tells the other during setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSetupInfo {
    pub network_identifier: NetworkId,
    pub connection_type: ConnectionType,
    /// Where the sender accepts connections, if it listens
    pub listen_endpoint: Option<SocketAddr>,
}

fn local_setup_info(shared: &Shared) -> ConnectionSetupInfo {
    ConnectionSetupInfo {
        network_identifier: shared.network_id,
        connection_type: ConnectionType::Tcp,
        listen_endpoint: shared.listen_endpoint(),
    }
}

/// Run the handshake for a freshly wrapped socket.
///
/// Starts the read loop. On failure the connection is closed and the error
/// returned to whoever asked for the connection.
#[instrument(skip_all, fields(connection = %conn))]
pub(crate) async fn establish(
    shared: &Arc<Shared>,
    conn: &Connection,
    reader: tokio::net::tcp::OwnedReadHalf,
) -> Result<()> {
    if let Err(e) = conn.begin_establishing() {
        conn.close(e.to_string()).await;
        return Err(e);
    }

    if let Err(e) = claim_endpoint(shared, conn).await {
        return fail(shared, conn, e).await;
    }

    tcp::spawn_read_loop(conn.clone(), reader);

    if !conn.is_managed() {
        if let Err(e) = conn.mark_established() {
            return fail(shared, conn, e).await;
        }
        finish(shared, conn);
        return Ok(());
    }

    if !conn.is_server_side() {
        if let Err(e) = conn.send_internal(CONNECTION_SETUP, &local_setup_info(shared)).await {
            return fail(shared, conn, e).await;
        }
    }

    let timeout = conn.settings().establish_timeout;
    if let Err(e) = conn.wait_established(timeout).await {
        return fail(shared, conn, e).await;
    }

    finish(shared, conn);
    Ok(())
}

fn finish(shared: &Shared, conn: &Connection) {
    shared.metrics.connection_established();
    info!(connection = %conn, "Connection established");
    shared.fire_established(conn);
    tcp::spawn_keep_alive(conn.clone(), conn.settings().keep_alive_interval);
}

/// Every handshake fault surfaces as `ConnectionSetup`, which closes the connection
fn setup_error(error: ProtocolError) -> ProtocolError {
    match error {
        ProtocolError::ConnectionSetup(_) => error,
        other => ProtocolError::ConnectionSetup(other.to_string()),
    }
}

async fn fail(shared: &Shared, conn: &Connection, error: ProtocolError) -> Result<()> {
    shared.metrics.handshake_failed();
    let error = setup_error(error);
    warn!(connection = %conn, error = %error, "Connection setup failed");
    conn.close(error.to_string()).await;
    Err(error)
}

/// Register the connection under its endpoint pair, resolving a live occupant
async fn claim_endpoint(shared: &Shared, conn: &Connection) -> Result<()> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let existing = match shared.registry.try_add_by_endpoint(conn)? {
            Ok(()) => return Ok(()),
            Err(existing) => existing,
        };

        debug!(connection = %conn, existing = %existing, "Endpoint pair already registered, probing");
        if existing.check_alive(conn.settings().alive_test_timeout).await {
            return Err(ProtocolError::DuplicateConnection(constants::ERR_EXISTING_ALIVE.into()));
        }
        existing
            .close("Replaced by a new connection on the same endpoint pair")
            .await;
    }
    Err(ProtocolError::ConnectionSetup(format!(
        "Could not claim endpoint pair after {MAX_CLAIM_ATTEMPTS} attempts"
    )))
}

/// Process the peer's `ConnectionSetup` packet
pub(crate) async fn handle_setup(conn: &Connection, packet: &Packet) -> Result<()> {
    apply_setup(conn, packet).await.map_err(setup_error)
}

async fn apply_setup(conn: &Connection, packet: &Packet) -> Result<()> {
    let shared = conn.shared().ok_or(ProtocolError::ConnectionClosed)?;
    let remote: ConnectionSetupInfo = packet
        .decode(&PipelineConfig::internal(), conn.pipeline())
        .map_err(|e| ProtocolError::ConnectionSetup(format!("Malformed setup packet: {e}")))?;

    if remote.network_identifier.is_nil() {
        return Err(ProtocolError::InvalidConnectionId(format!(
            "Peer sent the nil network identifier {}",
            remote.network_identifier
        )));
    }
    if remote.network_identifier == shared.network_id {
        return Err(ProtocolError::ConnectionSetup(
            "Connection setup received from this instance itself".into(),
        ));
    }
    let state = conn.state();
    if state != ConnectionState::Establishing {
        return Err(ProtocolError::ConnectionSetup(format!(
            "Unexpected setup packet in state {state:?}"
        )));
    }

    conn.set_network_identifier(remote.network_identifier);

    // Inbound connections are indexed by the peer's listening endpoint
    if conn.is_server_side() {
        if let Some(listen) = remote.listen_endpoint {
            let corrected = SocketAddr::new(conn.remote_endpoint().ip(), listen.port());
            if corrected != conn.remote_endpoint() {
                shared.registry.remove_endpoint_entry(conn);
                conn.correct_remote_endpoint(corrected)?;
                claim_endpoint(&shared, conn).await?;
            }
        }
    }

    if let Some(displaced) = shared.registry.add_by_identifier(conn)? {
        info!(connection = %conn, displaced = %displaced, "Peer reconnected, closing previous connection");
        displaced
            .close("Replaced by a newer connection from the same peer")
            .await;
    }

    if conn.is_server_side() {
        conn.send_internal(CONNECTION_SETUP, &local_setup_info(&shared)).await?;
    }
    conn.mark_established()
}
