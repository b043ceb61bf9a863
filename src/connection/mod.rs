//! # Connections
//!
//! A [`Connection`] is a cheap, cloneable handle to one peer link. It owns the
//! write half of the socket behind a per-connection send lock, the
//! connection-specific handler registry, and the bookkeeping for outstanding
//! confirmations, liveness probes, replies and resend requests.
//!
//! ## Lifecycle
//! ```text
//! Undefined -> Establishing -> Established -> Shutdown
//! ```
//! `Shutdown` is terminal. Close side effects (socket shutdown, registry
//! removal, hooks) run exactly once, decided under the registry lock.
//!
//! ## Sending
//! Writes are serialized by the send lock; a packet's header and payload are
//! written back to back while it is held, and its sequence number is assigned
//! under the same lock. Shutdown interrupts a write the peer is not draining.
//! Waiting for a receive confirmation happens after the lock is released.

pub mod info;
pub mod registry;
pub(crate) mod tcp;

use crate::comms::Shared;
use crate::config::ConnectionConfig;
use crate::core::codec::{Frame, PacketCodec};
use crate::core::header::{HeaderLongItem, HeaderStringItem, PacketHeader};
use crate::core::packet::Packet;
use crate::core::pipeline::{PipelineConfig, Primitive, TransformPipeline};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handlers::{raw_pipeline, HandlerId, HandlerRegistry};
use crate::protocol::reserved::{is_reserved, AliveTest, ALIVE_TEST, NESTED_PACKET};
use crate::utils::metrics::Metrics;
use crate::utils::sent_packet_cache::SentPacketCache;
use crate::utils::timeout::with_timeout_or;
use bytes::Bytes;
use info::{ConnectionInfo, ConnectionState, NetworkId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on waiting for the send lock while closing
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

type ShutdownHook = Box<dyn FnOnce(&Connection) + Send>;

#[derive(Default)]
struct Waiters {
    /// sequence number -> sender blocked on its confirmation
    confirmations: HashMap<u64, oneshot::Sender<()>>,
    /// probe id -> caller of `check_alive`
    alive: HashMap<u64, oneshot::Sender<()>>,
    /// packet type -> callers of `send_receive_object`, oldest first
    replies: HashMap<String, VecDeque<oneshot::Sender<Packet>>>,
}

struct Inner {
    info: RwLock<ConnectionInfo>,
    state_tx: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    shared: Weak<Shared>,
    settings: ConnectionConfig,
    default_pipeline: PipelineConfig,
    pipeline: TransformPipeline,
    codec: PacketCodec,
    metrics: Arc<Metrics>,
    handlers: HandlerRegistry,
    waiters: Mutex<Waiters>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    sent_cache: Mutex<SentPacketCache>,
    requested_resends: Mutex<HashSet<String>>,
    sequence: AtomicU64,
    alive_counter: AtomicU64,
    close_started: AtomicBool,
    last_send: Mutex<Instant>,
    close_reason: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub(crate) fn new(shared: &Arc<Shared>, info: ConnectionInfo, writer: OwnedWriteHalf) -> Self {
        let settings = shared.connection_settings();
        let default_pipeline = shared.default_pipeline();
        let codec = PacketCodec::new(default_pipeline.serializer).with_max_payload(settings.max_payload_size);
        let sent_cache = SentPacketCache::new(
            settings.resend_cache_ttl,
            settings.resend_packet_ceiling,
            settings.resend_cache_max_bytes,
        );
        let (state_tx, _) = watch::channel(info.state());

        Self {
            inner: Arc::new(Inner {
                info: RwLock::new(info),
                state_tx,
                writer: tokio::sync::Mutex::new(Some(writer)),
                shared: Arc::downgrade(shared),
                settings,
                default_pipeline,
                pipeline: shared.pipeline.clone(),
                codec,
                metrics: shared.metrics.clone(),
                handlers: HandlerRegistry::new(),
                waiters: Mutex::new(Waiters::default()),
                shutdown_hooks: Mutex::new(Vec::new()),
                sent_cache: Mutex::new(sent_cache),
                requested_resends: Mutex::new(HashSet::new()),
                sequence: AtomicU64::new(0),
                alive_counter: AtomicU64::new(0),
                close_started: AtomicBool::new(false),
                last_send: Mutex::new(Instant::now()),
                close_reason: Mutex::new(None),
            }),
        }
    }

    // ---- descriptor ------------------------------------------------------

    /// Snapshot of the connection descriptor
    pub fn info(&self) -> ConnectionInfo {
        self.inner
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn network_identifier(&self) -> Option<NetworkId> {
        self.read_info(|info| info.network_identifier())
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.read_info(|info| info.remote_endpoint())
    }

    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.read_info(|info| info.local_endpoint())
    }

    pub fn is_managed(&self) -> bool {
        self.read_info(|info| info.is_managed())
    }

    pub fn is_server_side(&self) -> bool {
        self.read_info(|info| info.is_server_side())
    }

    /// Why the connection was closed, once it has been
    pub fn close_reason(&self) -> Option<String> {
        lock(&self.inner.close_reason).clone()
    }

    /// True when both handles refer to the same connection
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read_info<R>(&self, f: impl FnOnce(&ConnectionInfo) -> R) -> R {
        f(&self.inner.info.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_info<R>(&self, f: impl FnOnce(&mut ConnectionInfo) -> R) -> R {
        f(&mut self.inner.info.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn endpoint_key(&self) -> (SocketAddr, SocketAddr) {
        self.read_info(|info| {
            (
                info.remote_endpoint(),
                info.local_endpoint()
                    .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
            )
        })
    }

    pub(crate) fn settings(&self) -> &ConnectionConfig {
        &self.inner.settings
    }

    pub(crate) fn codec(&self) -> &PacketCodec {
        &self.inner.codec
    }

    pub(crate) fn pipeline(&self) -> &TransformPipeline {
        &self.inner.pipeline
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub(crate) fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.inner.shared.upgrade()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // ---- lifecycle -------------------------------------------------------

    pub(crate) fn begin_establishing(&self) -> Result<()> {
        self.write_info(|info| info.note_establishing())?;
        self.inner.state_tx.send_replace(ConnectionState::Establishing);
        Ok(())
    }

    pub(crate) fn mark_established(&self) -> Result<()> {
        self.write_info(|info| info.note_established())?;
        self.inner.state_tx.send_replace(ConnectionState::Established);
        Ok(())
    }

    pub(crate) fn set_network_identifier(&self, id: NetworkId) {
        self.write_info(|info| info.set_network_identifier(id));
    }

    pub(crate) fn correct_remote_endpoint(&self, endpoint: SocketAddr) -> Result<()> {
        self.write_info(|info| info.correct_remote_endpoint(endpoint))
    }

    pub(crate) fn close_started(&self) -> bool {
        self.inner.close_started.load(Ordering::Acquire)
    }

    /// True for the first caller only
    pub(crate) fn mark_close_started(&self) -> bool {
        !self.inner.close_started.swap(true, Ordering::AcqRel)
    }

    /// Wait until the handshake completes or the connection shuts down
    pub async fn wait_established(&self, timeout: Duration) -> Result<()> {
        let mut state_rx = self.subscribe_state();
        let settled = with_timeout_or(
            async {
                let state = state_rx
                    .wait_for(|s| matches!(s, ConnectionState::Established | ConnectionState::Shutdown))
                    .await
                    .map(|s| *s)
                    .map_err(|_| ProtocolError::ConnectionClosed)?;
                Ok(state)
            },
            timeout,
            || ProtocolError::ConnectionSetup(constants::ERR_SETUP_TIMEOUT.into()),
        )
        .await?;

        match settled {
            ConnectionState::Established => Ok(()),
            _ => Err(ProtocolError::ConnectionSetup(
                self.close_reason()
                    .unwrap_or_else(|| constants::ERR_ALREADY_SHUTDOWN.to_string()),
            )),
        }
    }

    /// Shut the connection down. Only the first call has any effect.
    #[instrument(skip(self, reason), fields(connection = %self))]
    pub async fn close(&self, reason: impl Into<String>) {
        let first = match self.shared() {
            Some(shared) => shared.registry.begin_close(self),
            None => self.mark_close_started(),
        };
        if !first {
            return;
        }

        let reason = reason.into();
        let previous = self.write_info(|info| info.note_shutdown());
        *lock(&self.inner.close_reason) = Some(reason.clone());
        self.inner.state_tx.send_replace(ConnectionState::Shutdown);

        // Dropping the senders fails every pending wait
        *lock(&self.inner.waiters) = Waiters::default();
        lock(&self.inner.requested_resends).clear();
        lock(&self.inner.sent_cache).clear();
        self.inner.handlers.clear();

        match tokio::time::timeout(WRITER_RELEASE_TIMEOUT, self.inner.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut w) = writer.take() {
                    let _ = w.shutdown().await;
                }
            }
            Err(_) => debug!("Write in progress during close, socket released when it finishes"),
        }

        let hooks = std::mem::take(&mut *lock(&self.inner.shutdown_hooks));
        for hook in hooks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(self))).is_err() {
                error!("Connection shutdown hook panicked");
            }
        }
        if let Some(shared) = self.shared() {
            shared.fire_closed(self);
        }

        if previous == ConnectionState::Established {
            self.inner.metrics.connection_closed();
        }
        info!(reason = %reason, "Connection closed");
    }

    /// Run `hook` once when the connection closes; immediately if it already has
    pub fn append_shutdown_hook<F>(&self, hook: F)
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        let mut hooks = lock(&self.inner.shutdown_hooks);
        if self.close_started() {
            drop(hooks);
            hook(self);
        } else {
            hooks.push(Box::new(hook));
        }
    }

    // ---- handlers --------------------------------------------------------

    /// Handle `packet_type` on this connection only, decoded with the default pipeline
    pub fn append_handler<T, F, Fut>(&self, packet_type: &str, handler: F) -> Result<HandlerId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(PacketHeader, Connection, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.append_handler_with(packet_type, self.inner.default_pipeline.clone(), handler)
    }

    pub fn append_handler_with<T, F, Fut>(
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
        self.ensure_global_compatible(packet_type, &config)?;
        self.inner.handlers.append(packet_type, config, handler)
    }

    pub fn append_array_handler_with<P, F, Fut>(
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
        self.ensure_global_compatible(packet_type, &config)?;
        self.inner.handlers.append_array(packet_type, config, handler)
    }

    pub fn append_raw_handler<F, Fut>(&self, packet_type: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(PacketHeader, Connection, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_global_compatible(packet_type, &raw_pipeline())?;
        self.inner.handlers.append_raw(packet_type, handler)
    }

    /// Connection and global handlers for one packet type decode the same payload
    fn ensure_global_compatible(&self, packet_type: &str, config: &PipelineConfig) -> Result<()> {
        match self.shared() {
            Some(shared) => shared.global_handlers.ensure_compatible(packet_type, config),
            None => Ok(()),
        }
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    pub fn remove_handlers_for(&self, packet_type: &str) -> bool {
        self.inner.handlers.remove_type(packet_type)
    }

    // ---- sending ---------------------------------------------------------

    /// Send `value` as `packet_type` through the default pipeline
    pub async fn send_object<T>(&self, packet_type: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let packet = self.build_application(packet_type, value, &self.inner.default_pipeline)?;
        self.send_packet(packet).await
    }

    /// Send `value` as `packet_type` through `config`.
    ///
    /// With `receive_confirmation_required` set this returns only once the
    /// peer has confirmed receipt, or fails with `ConfirmationTimeout`.
    pub async fn send_object_with<T>(&self, packet_type: &str, value: &T, config: &PipelineConfig) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let packet = self.build_application(packet_type, value, config)?;
        self.send_packet(packet).await
    }

    pub async fn send_array<P: Primitive>(&self, packet_type: &str, values: &[P]) -> Result<()> {
        self.send_array_with(packet_type, values, &self.inner.default_pipeline)
            .await
    }

    pub async fn send_array_with<P: Primitive>(
        &self,
        packet_type: &str,
        values: &[P],
        config: &PipelineConfig,
    ) -> Result<()> {
        ensure_application_type(packet_type)?;
        self.ensure_managed()?;
        let packet = Packet::build_array(packet_type, values, config, &self.inner.pipeline)?;
        self.send_packet(packet).await
    }

    /// Send `value` and wait for the first `return_type` packet that follows.
    ///
    /// The reply is decoded with the pipeline registered for `return_type` on
    /// this connection, then globally, falling back to the default pipeline.
    /// Handlers registered for `return_type` still run.
    pub async fn send_receive_object<T, R>(
        &self,
        send_type: &str,
        return_type: &str,
        timeout: Duration,
        value: &T,
    ) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut packet = self.build_application(send_type, value, &self.inner.default_pipeline)?;
        packet
            .header_mut()
            .set_string(HeaderStringItem::RequestedReturnPacketType, return_type);

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = lock(&self.inner.waiters);
            if self.close_started() {
                return Err(ProtocolError::ConnectionClosed);
            }
            waiters
                .replies
                .entry(return_type.to_string())
                .or_default()
                .push_back(tx);
        }

        self.send_packet(packet).await?;

        let reply = with_timeout_or(
            async { rx.await.map_err(|_| ProtocolError::ConnectionClosed) },
            timeout,
            || ProtocolError::Timeout,
        )
        .await?;

        let config = self.receive_pipeline_for(return_type);
        reply.decode(&config, &self.inner.pipeline)
    }

    /// Wrap a fully framed `packet_type` packet inside a `NestedPacket`
    pub async fn send_nested<T>(&self, packet_type: &str, value: &T, config: &PipelineConfig) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let inner = self.build_application(packet_type, value, config)?;
        let frame = self.inner.codec.frame(&inner)?;
        self.send_packet(Packet::raw(NESTED_PACKET, frame.to_bytes()))
            .await
    }

    /// Write `data` verbatim on an unmanaged connection
    pub async fn send_raw_bytes(&self, data: &[u8]) -> Result<()> {
        if self.is_managed() {
            return Err(ProtocolError::PacketHandler(
                "Raw bytes can only be sent on connections without the application layer protocol".into(),
            ));
        }
        self.write_chunks(&[data]).await?;
        self.inner.metrics.packet_sent(data.len() as u64);
        Ok(())
    }

    /// Probe the peer with an alive test
    pub async fn check_alive(&self, timeout: Duration) -> bool {
        if self.state() == ConnectionState::Shutdown {
            return false;
        }
        if !self.is_managed() {
            return true;
        }

        let id = self.inner.alive_counter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.waiters).alive.insert(id, tx);

        if let Err(e) = self.send_internal(ALIVE_TEST, &AliveTest::Request(id)).await {
            debug!(connection = %self, error = %e, "Alive test could not be sent");
            lock(&self.inner.waiters).alive.remove(&id);
            return false;
        }

        let alive = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        if !alive {
            lock(&self.inner.waiters).alive.remove(&id);
        }
        alive
    }

    fn build_application<T>(&self, packet_type: &str, value: &T, config: &PipelineConfig) -> Result<Packet>
    where
        T: Serialize + ?Sized,
    {
        ensure_application_type(packet_type)?;
        self.ensure_managed()?;
        Packet::build(packet_type, value, config, &self.inner.pipeline)
    }

    fn ensure_managed(&self) -> Result<()> {
        if self.is_managed() {
            Ok(())
        } else {
            Err(ProtocolError::PacketHandler(constants::ERR_NOT_MANAGED.into()))
        }
    }

    fn receive_pipeline_for(&self, packet_type: &str) -> PipelineConfig {
        self.inner
            .handlers
            .pipeline_for(packet_type)
            .or_else(|| {
                self.shared()
                    .and_then(|shared| shared.global_handlers.pipeline_for(packet_type))
            })
            .unwrap_or_else(|| self.inner.default_pipeline.clone())
    }

    /// Send a reserved packet encoded with the internal pipeline
    pub(crate) async fn send_internal<T>(&self, packet_type: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let packet = Packet::build(packet_type, value, &PipelineConfig::internal(), &self.inner.pipeline)?;
        self.send_packet(packet).await
    }

    pub(crate) async fn send_packet(&self, mut packet: Packet) -> Result<()> {
        if self.state() == ConnectionState::Shutdown {
            return Err(ProtocolError::ConnectionClosed);
        }

        // Sequence numbers match wire order
        let (seq, frame, confirmation, written) = {
            let mut writer = self.inner.writer.lock().await;
            let seq = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
            packet
                .header_mut()
                .set_long(HeaderLongItem::PacketSequenceNumber, seq as i64);
            if self.inner.settings.enable_checksum_validation {
                packet = packet.with_checksum();
            }

            let confirmation = if packet.header().receive_confirmation_required() {
                let (tx, rx) = oneshot::channel();
                let mut waiters = lock(&self.inner.waiters);
                if self.close_started() {
                    return Err(ProtocolError::ConnectionClosed);
                }
                waiters.confirmations.insert(seq, tx);
                Some(rx)
            } else {
                None
            };

            let frame = match self.inner.codec.frame(&packet) {
                Ok(frame) => frame,
                Err(e) => {
                    lock(&self.inner.waiters).confirmations.remove(&seq);
                    return Err(e);
                }
            };
            if let Some(hash) = packet.header().checksum() {
                lock(&self.inner.sent_cache).insert(hash, frame.clone());
            }

            let written = self
                .write_locked(&mut writer, &[&frame.header[..], &frame.payload[..]])
                .await;
            (seq, frame, confirmation, written)
        };

        if let Err(e) = self.settle_write(written).await {
            lock(&self.inner.waiters).confirmations.remove(&seq);
            return Err(e);
        }
        self.inner.metrics.packet_sent(frame.len() as u64);

        let Some(rx) = confirmation else {
            return Ok(());
        };
        let result = with_timeout_or(
            async {
                rx.await.map_err(|_| {
                    ProtocolError::ConfirmationTimeout(constants::ERR_CONFIRMATION_PEER_GONE.into())
                })
            },
            self.inner.settings.confirmation_timeout,
            || ProtocolError::ConfirmationTimeout(constants::ERR_CONFIRMATION_TIMEOUT.into()),
        )
        .await;

        if result.is_err() {
            lock(&self.inner.waiters).confirmations.remove(&seq);
            self.inner.metrics.confirmation_timeout();
            warn!(connection = %self, packet_type = packet.packet_type(), sequence = seq, "No receive confirmation");
        }
        result
    }

    pub(crate) async fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.write_chunks(&[&frame.header[..], &frame.payload[..]]).await
    }

    /// Write `chunks` back to back under the send lock.
    ///
    /// A failed write closes the connection.
    pub(crate) async fn write_chunks(&self, chunks: &[&[u8]]) -> Result<()> {
        let written = {
            let mut writer = self.inner.writer.lock().await;
            self.write_locked(&mut writer, chunks).await
        };
        self.settle_write(written).await
    }

    /// Write while holding the send lock.
    ///
    /// Shutdown interrupts a write the peer is not draining; the write half is
    /// then dropped, which closes the socket with a partial frame on the wire.
    async fn write_locked(&self, writer: &mut Option<OwnedWriteHalf>, chunks: &[&[u8]]) -> Result<()> {
        let mut state_rx = self.subscribe_state();
        let outcome = match writer.as_mut() {
            None => return Err(ProtocolError::ConnectionClosed),
            Some(w) => {
                tokio::select! {
                    biased;
                    _ = state_rx.wait_for(|s| *s == ConnectionState::Shutdown) => None,
                    written = write_all_chunks(w, chunks) => Some(written),
                }
            }
        };

        match outcome {
            Some(written) => written,
            None => {
                // Dropping the write half shuts down the write direction
                drop(writer.take());
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Record a successful write, or close the connection after a failed one
    async fn settle_write(&self, written: Result<()>) -> Result<()> {
        match written {
            Ok(()) => {
                *lock(&self.inner.last_send) = Instant::now();
                Ok(())
            }
            Err(ProtocolError::ConnectionClosed) => Err(ProtocolError::ConnectionClosed),
            Err(e) => {
                let message = format!("Write failed: {e}");
                self.close(message.clone()).await;
                Err(ProtocolError::Communication(message))
            }
        }
    }

    /// Time since the last successful write
    pub(crate) fn idle_for(&self) -> Duration {
        lock(&self.inner.last_send).elapsed()
    }

    // ---- receive-side bookkeeping ---------------------------------------

    pub(crate) fn complete_confirmation(&self, seq: u64) {
        match lock(&self.inner.waiters).confirmations.remove(&seq) {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(connection = %self, sequence = seq, "Confirmation for unknown sequence number"),
        }
    }

    pub(crate) fn complete_alive(&self, id: u64) {
        if let Some(tx) = lock(&self.inner.waiters).alive.remove(&id) {
            let _ = tx.send(());
        }
    }

    /// Hand the packet to the oldest live `send_receive_object` caller waiting for its type
    pub(crate) fn deliver_reply(&self, packet: &Packet) -> bool {
        let mut waiters = lock(&self.inner.waiters);
        let Some(queue) = waiters.replies.get_mut(packet.packet_type()) else {
            return false;
        };
        let mut delivered = false;
        while let Some(tx) = queue.pop_front() {
            if tx.send(packet.clone()).is_ok() {
                delivered = true;
                break;
            }
        }
        if queue.is_empty() {
            waiters.replies.remove(packet.packet_type());
        }
        delivered
    }

    /// Record that a resend of `hash` was requested. False if already pending.
    pub(crate) fn record_requested_resend(&self, hash: &str) -> bool {
        lock(&self.inner.requested_resends).insert(hash.to_string())
    }

    /// Whether `hash` was awaiting a resend; clears the entry
    pub(crate) fn take_requested_resend(&self, hash: &str) -> bool {
        lock(&self.inner.requested_resends).remove(hash)
    }

    pub(crate) fn cached_frame(&self, hash: &str) -> Option<Frame> {
        lock(&self.inner.sent_cache).get(hash)
    }
}

async fn write_all_chunks(writer: &mut OwnedWriteHalf, chunks: &[&[u8]]) -> Result<()> {
    for chunk in chunks {
        writer.write_all(chunk).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Application code may not send reserved packet types
fn ensure_application_type(packet_type: &str) -> Result<()> {
    if packet_type.is_empty() {
        return Err(ProtocolError::PacketHandler("Packet type cannot be empty".into()));
    }
    if is_reserved(packet_type) {
        return Err(ProtocolError::PacketHandler(format!(
            "'{packet_type}' is a reserved packet type"
        )));
    }
    Ok(())
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read_info(|info| fmt::Display::fmt(info, f))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_types_cannot_be_sent() {
        assert!(ensure_application_type("Confirmation").is_err());
        assert!(ensure_application_type("ConnectionSetup").is_err());
        assert!(ensure_application_type("").is_err());
        assert!(ensure_application_type("Message").is_ok());
    }
}
