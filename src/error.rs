//! # Error Types
//!
//! Error handling for connection setup, framing, the transform pipeline and
//! handler dispatch.
//!
//! ## Error Categories
//! - **Setup faults**: handshake timeout, duplicate-connection conflicts,
//!   re-establishing a closed or established connection
//! - **Communication faults**: socket write failures, invalid assembler state
//! - **Integrity faults**: checksum mismatch on a resent packet
//! - **Timing faults**: missing receive confirmation or peer disconnect mid-wait
//! - **Usage faults**: serialization, handler registration, unknown packet types
//! - **Identity faults**: duplicate connections and invalid connection
//!   identifiers, raised during setup and reported as setup faults
//!
//! Setup, communication and integrity faults close the connection they occur on.
//! Timing and usage faults are surfaced to the caller and leave the connection open.
//!
//! ## Example Usage
//! ```rust
//! use network_comms::error::{ProtocolError, Result};
//!
//! fn require_type(packet_type: &str) -> Result<()> {
//!     if packet_type.is_empty() {
//!         return Err(ProtocolError::PacketHandler("packet type cannot be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_type("").is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Registry and dispatcher errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire connection registry lock";
    pub const ERR_HANDLER_LOCK: &str = "Failed to acquire handler registry lock";

    /// Framing errors
    pub const ERR_HEADER_TOO_LARGE: &str = "Serialized packet header exceeds 255 bytes";
    pub const ERR_EMPTY_HEADER: &str = "Packet header is missing the packet type";
    pub const ERR_DISCARD_OVERRUN: &str = "Attempted to discard more bytes than are buffered";

    /// Connection lifecycle errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_ALREADY_ESTABLISHING: &str = "Connection is already being established";
    pub const ERR_ALREADY_SHUTDOWN: &str = "Connection has already been shut down";
    pub const ERR_NO_PEER_IDENTIFIER: &str =
        "Cannot mark connection established before the peer identifier is known";
    pub const ERR_SETUP_TIMEOUT: &str = "Timed out waiting for connection setup to complete";
    pub const ERR_EXISTING_ALIVE: &str =
        "A live connection already exists for this local and remote endpoint pair";
    pub const ERR_NOT_MANAGED: &str =
        "Operation requires the application layer protocol to be enabled";

    /// Send path errors
    pub const ERR_CONFIRMATION_TIMEOUT: &str = "Timed out waiting for receive confirmation";
    pub const ERR_CONFIRMATION_PEER_GONE: &str =
        "Connection shut down before receive confirmation arrived";
    pub const ERR_RESEND_CHECKSUM: &str = "Checksum mismatch on a resent packet";

    /// Pipeline errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_MISSING_PASSWORD: &str = "Encryption processor requires the Password option";
    pub const ERR_ARRAY_TRAILER: &str = "Primitive array payload is missing its length trailer";
}

// ProtocolError is the primary error type for all operations in this crate
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection setup failed: {0}")]
    ConnectionSetup(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Checksum error: {0}")]
    CheckSum(String),

    #[error("Confirmation timeout: {0}")]
    ConfirmationTimeout(String),

    #[error("Packet handler error: {0}")]
    PacketHandler(String),

    #[error("Unexpected packet type: {0}")]
    UnexpectedPacketType(String),

    #[error("Duplicate connection: {0}")]
    DuplicateConnection(String),

    #[error("Invalid connection id: {0}")]
    InvalidConnectionId(String),

    #[error("{}", constants::ERR_CONNECTION_CLOSED)]
    ConnectionClosed,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("{}", constants::ERR_DECRYPTION_FAILED)]
    DecryptionFailure,

    #[error("{}", constants::ERR_ENCRYPTION_FAILED)]
    EncryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error leaves the connection it occurred on unusable.
    ///
    /// Receive-path errors of these kinds force-close the connection.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectionSetup(_)
                | ProtocolError::Communication(_)
                | ProtocolError::CheckSum(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::OversizedPacket(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
