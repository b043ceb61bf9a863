//! # network-comms
//!
//! Peer-to-peer connection management, packet framing and a reversible
//! transform pipeline for async Rust services.
//!
//! ## Layers
//! - **core**: packet header, wire codec, stream assembler, serializers,
//!   data processors and the transform pipeline
//! - **connection**: connection handles, descriptors and the registry
//! - **protocol**: handshake, reserved packet handling, integrity checks,
//!   handler registry and the priority dispatcher
//! - **transport**: TCP listener
//! - **utils**: compression, crypto, logging, metrics, timing helpers
//!
//! ## Wire format
//! ```text
//! [header length (1)] [header (0-255)] [payload (TotalPayloadSize)]
//! ```
//! A single zero byte between packets is a keep-alive.
//!
//! ## Quick start
//! ```rust,no_run
//! use network_comms::{ConnectionInfo, NetworkComms, NetworkConfig, PipelineConfig, SerializationFormat};
//!
//! # async fn run() -> network_comms::Result<()> {
//! let server = NetworkComms::new(NetworkConfig::default())?;
//! let text = PipelineConfig::new(SerializationFormat::Raw);
//! server.append_global_handler_with("Message", text.clone(), |_, _, message: String| async move {
//!     println!("{message}");
//!     Ok(())
//! })?;
//! let addr = server.start_listening_on("127.0.0.1:0".parse().unwrap()).await?;
//!
//! let client = NetworkComms::new(NetworkConfig::default())?;
//! let conn = client.get_or_create_connection(ConnectionInfo::new(addr)).await?;
//! conn.send_object_with("Message", "hello", &text).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod comms;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use comms::NetworkComms;
pub use config::NetworkConfig;
pub use connection::info::{
    ApplicationLayerProtocol, ConnectionInfo, ConnectionState, ConnectionType, NetworkId,
};
pub use connection::Connection;
pub use crate::core::header::{HeaderLongItem, HeaderStringItem, PacketHeader};
pub use crate::core::packet::Packet;
pub use crate::core::pipeline::{PipelineConfig, Primitive, TransformPipeline};
pub use crate::core::processor::ProcessorKind;
pub use crate::core::serialization::SerializationFormat;
pub use error::{ProtocolError, Result};
pub use protocol::dispatcher::Priority;
pub use protocol::handlers::HandlerId;
pub use protocol::handshake::ConnectionSetupInfo;
