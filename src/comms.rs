//! # NetworkComms
//!
//! The owning handle for one networking instance: listeners, the connection
//! registry, global handlers, lifecycle hooks and the dispatcher.
//!
//! ## Example
//! ```rust,no_run
//! use network_comms::{ConnectionInfo, NetworkComms, NetworkConfig, PipelineConfig};
//!
//! # async fn run() -> network_comms::Result<()> {
//! let comms = NetworkComms::new(NetworkConfig::default())?;
//! comms.append_global_handler("Chat", |_header, conn, text: String| async move {
//!     println!("{conn}: {text}");
//!     Ok(())
//! })?;
//! comms.start_listening().await?;
//!
//! let peer = comms
//!     .get_or_create_connection(ConnectionInfo::new("127.0.0.1:4001".parse().unwrap()))
//!     .await?;
//! peer.send_object("Chat", "hello").await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConnectionConfig, NetworkConfig};
use crate::connection::info::{
    ApplicationLayerProtocol, ConnectionInfo, ConnectionState, ConnectionType, NetworkId,
};
use crate::connection::registry::ConnectionRegistry;
use crate::connection::Connection;
use crate::core::header::PacketHeader;
use crate::core::pipeline::{PipelineConfig, Primitive, TransformPipeline};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handlers::{raw_pipeline, HandlerId, HandlerRegistry};
use crate::protocol::handshake;
use crate::transport::tcp::{self, ListenerHandle};
use crate::utils::metrics::{Metrics, MetricsSnapshot};
use crate::utils::timeout::with_timeout_error;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::{error, info, instrument, warn};

type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// State shared by the instance, its connections and its listeners
pub(crate) struct Shared {
    pub(crate) network_id: NetworkId,
    config: RwLock<NetworkConfig>,
    pub(crate) pipeline: TransformPipeline,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) global_handlers: HandlerRegistry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) metrics: Arc<Metrics>,
    established_hooks: RwLock<Vec<ConnectionHook>>,
    closed_hooks: RwLock<Vec<ConnectionHook>>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl Shared {
    pub(crate) fn config(&self) -> NetworkConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn connection_settings(&self) -> ConnectionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connection
            .clone()
    }

    pub(crate) fn default_pipeline(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pipeline
            .to_pipeline_config()
    }

    /// Endpoint advertised to peers during setup
    pub(crate) fn listen_endpoint(&self) -> Option<SocketAddr> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|l| l.application_layer_protocol() == ApplicationLayerProtocol::Enabled)
            .map(|l| l.local_addr())
    }

    pub(crate) fn fire_established(&self, conn: &Connection) {
        run_hooks(&self.established_hooks, conn, "established");
    }

    pub(crate) fn fire_closed(&self, conn: &Connection) {
        run_hooks(&self.closed_hooks, conn, "closed");
    }
}

fn run_hooks(hooks: &RwLock<Vec<ConnectionHook>>, conn: &Connection, event: &'static str) {
    let hooks = hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
    for hook in hooks {
        if std::panic::catch_unwind(AssertUnwindSafe(|| hook(conn))).is_err() {
            error!(connection = %conn, event, "Connection hook panicked");
        }
    }
}

/// One peer-to-peer networking instance. Cheap to clone.
#[derive(Clone)]
pub struct NetworkComms {
    shared: Arc<Shared>,
}

impl NetworkComms {
    /// Create an instance with a fresh network identifier.
    ///
    /// Must be called from within a tokio runtime; the dispatcher workers are
    /// spawned on it.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let runtime = Handle::try_current().map_err(|e| {
            ProtocolError::ConfigError(format!("NetworkComms requires a tokio runtime: {e}"))
        })?;

        let pipeline = TransformPipeline::new();
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::start(
            config.dispatch.effective_worker_count(),
            &runtime,
            pipeline.clone(),
            metrics.clone(),
        );
        let network_id = NetworkId::new();
        info!(network_id = %network_id, "Network instance created");

        Ok(Self {
            shared: Arc::new(Shared {
                network_id,
                config: RwLock::new(config),
                pipeline,
                registry: ConnectionRegistry::new(),
                global_handlers: HandlerRegistry::new(),
                dispatcher,
                metrics,
                established_hooks: RwLock::new(Vec::new()),
                closed_hooks: RwLock::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn network_identifier(&self) -> NetworkId {
        self.shared.network_id
    }

    pub fn config(&self) -> NetworkConfig {
        self.shared.config()
    }

    /// Replace the configuration. Existing connections keep the settings they
    /// were created with.
    pub fn update_config(&self, config: NetworkConfig) -> Result<()> {
        config.validate_strict()?;
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    // ---- listening -------------------------------------------------------

    /// Listen on the configured address
    pub async fn start_listening(&self) -> Result<SocketAddr> {
        let address = self.shared.config().listener.address;
        let addr = address.parse::<SocketAddr>().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid listen address '{address}': {e}"))
        })?;
        self.start_listening_on(addr).await
    }

    /// Listen on `addr`; port 0 picks a free port. Returns the bound address.
    pub async fn start_listening_on(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.start_listening_with(addr, ApplicationLayerProtocol::Enabled)
            .await
    }

    pub async fn start_listening_with(
        &self,
        addr: SocketAddr,
        alp: ApplicationLayerProtocol,
    ) -> Result<SocketAddr> {
        let handle = tcp::start_listener(&self.shared, addr, alp).await?;
        let local_addr = handle.local_addr();
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(local_addr)
    }

    /// Stop every listener. Existing connections stay open.
    pub async fn stop_listening(&self) {
        let listeners = std::mem::take(
            &mut *self
                .shared
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener.stop().await;
        }
    }

    pub fn listening_endpoints(&self) -> Vec<SocketAddr> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|l| l.local_addr())
            .collect()
    }

    // ---- connections -----------------------------------------------------

    /// Return the existing connection to `info`'s remote endpoint, or connect
    /// and run the handshake.
    #[instrument(skip(self, info), fields(remote = %info.remote_endpoint()))]
    pub async fn get_or_create_connection(&self, info: ConnectionInfo) -> Result<Connection> {
        if info.connection_type() == ConnectionType::Udp {
            return Err(ProtocolError::ConnectionSetup(
                "UDP connections are not supported".into(),
            ));
        }

        let settings = self.shared.connection_settings();
        let remote = info.remote_endpoint();
        let alp = info.application_layer_protocol();

        for existing in self.shared.registry.by_remote_endpoint(remote) {
            if existing.info().application_layer_protocol() != alp {
                continue;
            }
            match existing.state() {
                ConnectionState::Established => return Ok(existing),
                ConnectionState::Establishing => {
                    existing.wait_established(settings.establish_timeout).await?;
                    return Ok(existing);
                }
                ConnectionState::Undefined | ConnectionState::Shutdown => {}
            }
        }

        let stream = tokio::time::timeout(settings.establish_timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| ProtocolError::ConnectionSetup(format!("Timed out connecting to {remote}")))?
            .map_err(|e| ProtocolError::ConnectionSetup(format!("Failed to connect to {remote}: {e}")))?;
        stream.set_nodelay(true)?;

        let (conn, reader) = Connection::from_stream(&self.shared, stream, false, alp)?;
        handshake::establish(&self.shared, &conn, reader).await?;
        Ok(conn)
    }

    /// Every registered connection
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.registry.all()
    }

    pub fn connection_by_id(&self, id: &NetworkId) -> Option<Connection> {
        self.shared.registry.by_identifier(id)
    }

    /// Connection to `remote`, optionally narrowed to one local endpoint
    pub fn connection_by_endpoint(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> Option<Connection> {
        match local {
            Some(local) => self.shared.registry.by_endpoint_pair(remote, local),
            None => self
                .shared
                .registry
                .by_remote_endpoint(remote)
                .into_iter()
                .next(),
        }
    }

    pub async fn close_all_connections(&self) {
        for conn in self.shared.registry.all() {
            conn.close("Closed locally").await;
        }
    }

    /// Stop listening, close every connection and stop the dispatcher.
    ///
    /// Closing is bounded by `listener.shutdown_timeout`.
    pub async fn shutdown(&self) {
        let limit = self.shared.config().listener.shutdown_timeout;
        self.stop_listening().await;

        let closing = async {
            self.close_all_connections().await;
            Ok(())
        };
        if with_timeout_error(closing, limit).await.is_err() {
            warn!(timeout = ?limit, "Connections still closing when the shutdown timeout expired");
        }
        self.shared.dispatcher.shutdown();
        self.shared.metrics.log_metrics();
        info!(network_id = %self.shared.network_id, "Network instance shut down");
    }

    // ---- handlers and hooks ---------------------------------------------

    /// Handle `packet_type` on every connection, decoded with the default pipeline
    pub fn append_global_handler<T, F, Fut>(&self, packet_type: &str, handler: F) -> Result<HandlerId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(PacketHeader, Connection, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.append_global_handler_with(packet_type, self.shared.default_pipeline(), handler)
    }

    pub fn append_global_handler_with<T, F, Fut>(
        &self,
        packet_type: &str,
        config: PipelineConfig,
        handler: F,
    ) -> Result<HandlerId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(PacketHeader, Connection, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_connections_compatible(packet_type, &config)?;
        self.shared.global_handlers.append(packet_type, config, handler)
    }

    pub fn append_global_array_handler<P, F, Fut>(
        &self,
        packet_type: &str,
        config: PipelineConfig,
        handler: F,
    ) -> Result<HandlerId>
    where
        P: Primitive,
        F: Fn(PacketHeader, Connection, Vec<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_connections_compatible(packet_type, &config)?;
        self.shared
            .global_handlers
            .append_array(packet_type, config, handler)
    }

    /// Raw handlers receive payload bytes as sent; use `"Unmanaged"` for
    /// connections without the application layer protocol
    pub fn append_global_raw_handler<F, Fut>(&self, packet_type: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(PacketHeader, Connection, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_connections_compatible(packet_type, &raw_pipeline())?;
        self.shared.global_handlers.append_raw(packet_type, handler)
    }

    /// A global handler must decode what every live connection's own handlers for the type decode
    fn ensure_connections_compatible(&self, packet_type: &str, config: &PipelineConfig) -> Result<()> {
        self.shared
            .registry
            .all()
            .iter()
            .try_for_each(|conn| conn.handlers().ensure_compatible(packet_type, config))
    }

    pub fn remove_global_handler(&self, id: HandlerId) -> bool {
        self.shared.global_handlers.remove(id)
    }

    pub fn remove_global_handlers_for(&self, packet_type: &str) -> bool {
        self.shared.global_handlers.remove_type(packet_type)
    }

    pub fn remove_all_global_handlers(&self) {
        self.shared.global_handlers.clear();
    }

    pub fn append_connection_established_hook<F>(&self, hook: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.shared
            .established_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    pub fn append_connection_closed_hook<F>(&self, hook: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.shared
            .closed_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    // ---- observability ---------------------------------------------------

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn log_metrics(&self) {
        self.shared.metrics.log_metrics();
    }
}
