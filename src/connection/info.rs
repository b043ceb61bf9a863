//! Connection descriptor: identity, addressing and lifecycle state.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::current_timestamp_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Process-unique peer token, generated once per `NetworkComms` instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(Uuid);

impl NetworkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The all-zero identifier is never generated and is refused during setup
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for NetworkId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    Tcp,
    /// Accepted in descriptors but not supported by the transport
    Udp,
}

/// Whether the connection carries framed packets or raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ApplicationLayerProtocol {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Undefined,
    Establishing,
    Established,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    connection_type: ConnectionType,
    application_layer_protocol: ApplicationLayerProtocol,
    network_identifier: Option<NetworkId>,
    local_endpoint: Option<SocketAddr>,
    remote_endpoint: SocketAddr,
    state: ConnectionState,
    created_at: i64,
    established_at: Option<i64>,
    server_side: bool,
}

impl ConnectionInfo {
    /// Descriptor for an outgoing managed TCP connection to `remote`
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            connection_type: ConnectionType::Tcp,
            application_layer_protocol: ApplicationLayerProtocol::Enabled,
            network_identifier: None,
            local_endpoint: None,
            remote_endpoint: remote,
            state: ConnectionState::Undefined,
            created_at: current_timestamp_millis(),
            established_at: None,
            server_side: false,
        }
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn with_application_layer_protocol(mut self, alp: ApplicationLayerProtocol) -> Self {
        self.application_layer_protocol = alp;
        self
    }

    /// Descriptor for a socket that is already connected
    pub(crate) fn for_stream(
        remote: SocketAddr,
        local: SocketAddr,
        server_side: bool,
        alp: ApplicationLayerProtocol,
    ) -> Self {
        let mut info = Self::new(remote).with_application_layer_protocol(alp);
        info.local_endpoint = Some(local);
        info.server_side = server_side;
        info
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn application_layer_protocol(&self) -> ApplicationLayerProtocol {
        self.application_layer_protocol
    }

    pub fn is_managed(&self) -> bool {
        self.application_layer_protocol == ApplicationLayerProtocol::Enabled
    }

    /// Peer identifier; `None` until the handshake delivers it
    pub fn network_identifier(&self) -> Option<NetworkId> {
        self.network_identifier
    }

    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local_endpoint
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Milliseconds since the Unix epoch
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn established_at(&self) -> Option<i64> {
        self.established_at
    }

    /// True when the remote party initiated the connection
    pub fn is_server_side(&self) -> bool {
        self.server_side
    }

    pub(crate) fn note_establishing(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Undefined => {
                self.state = ConnectionState::Establishing;
                Ok(())
            }
            ConnectionState::Shutdown => Err(ProtocolError::ConnectionSetup(
                constants::ERR_ALREADY_SHUTDOWN.into(),
            )),
            ConnectionState::Establishing | ConnectionState::Established => Err(
                ProtocolError::ConnectionSetup(constants::ERR_ALREADY_ESTABLISHING.into()),
            ),
        }
    }

    /// Managed connections need the peer identifier first
    pub(crate) fn note_established(&mut self) -> Result<()> {
        if self.state != ConnectionState::Establishing {
            return Err(ProtocolError::ConnectionSetup(format!(
                "Cannot complete setup from state {:?}",
                self.state
            )));
        }
        if self.is_managed() && self.network_identifier.is_none() {
            return Err(ProtocolError::ConnectionSetup(
                constants::ERR_NO_PEER_IDENTIFIER.into(),
            ));
        }
        self.state = ConnectionState::Established;
        self.established_at = Some(current_timestamp_millis());
        Ok(())
    }

    /// Returns the previous state
    pub(crate) fn note_shutdown(&mut self) -> ConnectionState {
        std::mem::replace(&mut self.state, ConnectionState::Shutdown)
    }

    pub(crate) fn set_network_identifier(&mut self, id: NetworkId) {
        self.network_identifier = Some(id);
    }

    /// Only allowed while the handshake is in progress
    pub(crate) fn correct_remote_endpoint(&mut self, endpoint: SocketAddr) -> Result<()> {
        if self.state != ConnectionState::Establishing {
            return Err(ProtocolError::ConnectionSetup(format!(
                "Remote endpoint is fixed once setup has finished (state {:?})",
                self.state
            )));
        }
        self.remote_endpoint = endpoint;
        Ok(())
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.server_side { "<-" } else { "->" };
        match self.local_endpoint {
            Some(local) => write!(f, "{local} {arrow} {}", self.remote_endpoint)?,
            None => write!(f, "{arrow} {}", self.remote_endpoint)?,
        }
        if let Some(id) = self.network_identifier {
            write!(f, " [{id}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lifecycle_transitions() {
        let mut info = ConnectionInfo::new(addr(4000));
        assert_eq!(info.state(), ConnectionState::Undefined);

        info.note_establishing().unwrap();
        assert!(info.note_establishing().is_err());

        // Identifier must arrive first
        assert!(info.note_established().is_err());
        info.set_network_identifier(NetworkId::new());
        info.note_established().unwrap();
        assert!(info.established_at().is_some());

        assert_eq!(info.note_shutdown(), ConnectionState::Established);
        assert_eq!(info.note_shutdown(), ConnectionState::Shutdown);
        assert!(info.note_establishing().is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_unmanaged_needs_no_identifier() {
        let mut info = ConnectionInfo::for_stream(
            addr(1),
            addr(2),
            false,
            ApplicationLayerProtocol::Disabled,
        );
        info.note_establishing().unwrap();
        info.note_established().unwrap();
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_endpoint_correction_only_during_setup() {
        let mut info = ConnectionInfo::for_stream(addr(50000), addr(4000), true, Default::default());
        assert!(info.correct_remote_endpoint(addr(4001)).is_err());

        info.note_establishing().unwrap();
        info.correct_remote_endpoint(addr(4001)).unwrap();
        assert_eq!(info.remote_endpoint(), addr(4001));

        info.set_network_identifier(NetworkId::new());
        info.note_established().unwrap();
        assert!(info.correct_remote_endpoint(addr(4002)).is_err());
    }
}
