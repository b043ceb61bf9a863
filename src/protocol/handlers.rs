//! Packet handler registry.
//!
//! Maps a packet type to the pipeline configuration used to decode it and an
//! ordered list of type-erased async callbacks. All registrations for one
//! packet type must use compatible pipelines (same serializer, same set of
//! processors).

use crate::connection::Connection;
use crate::core::header::PacketHeader;
use crate::core::pipeline::{PipelineConfig, Primitive, TransformPipeline};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::reserved::{is_reserved, UNMANAGED};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Decodes the payload and starts the user callback
type ErasedHandler = dyn Fn(&PacketHeader, &Connection, &Bytes, &PipelineConfig, &TransformPipeline) -> Result<BoxFuture<Result<()>>>
    + Send
    + Sync;

/// Identifies one registration for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    id: HandlerId,
    call: Arc<ErasedHandler>,
}

impl HandlerEntry {
    pub(crate) fn invoke(
        &self,
        header: &PacketHeader,
        conn: &Connection,
        payload: &Bytes,
        config: &PipelineConfig,
        pipeline: &TransformPipeline,
    ) -> Result<BoxFuture<Result<()>>> {
        (self.call)(header, conn, payload, config, pipeline)
    }
}

/// Handlers for one packet type, ready to run without holding the registry lock
#[derive(Clone)]
pub(crate) struct HandlerSet {
    pub(crate) config: PipelineConfig,
    pub(crate) entries: Vec<HandlerEntry>,
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Pipeline recorded for raw handlers, which see payload bytes as sent
pub(crate) fn raw_pipeline() -> PipelineConfig {
    PipelineConfig::default()
}

#[derive(Default)]
pub struct HandlerRegistry {
    by_type: RwLock<HashMap<String, HandlerSet>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler receiving the payload decoded as `T`
    pub fn append<T, F, Fut>(&self, packet_type: &str, config: PipelineConfig, handler: F) -> Result<HandlerId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(PacketHeader, Connection, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let call: Arc<ErasedHandler> = Arc::new(
            move |header: &PacketHeader,
                  conn: &Connection,
                  payload: &Bytes,
                  config: &PipelineConfig,
                  pipeline: &TransformPipeline|
                  -> Result<BoxFuture<Result<()>>> {
                let value: T = pipeline.reverse(payload, config)?;
                let fut: BoxFuture<Result<()>> = Box::pin(handler(header.clone(), conn.clone(), value));
                Ok(fut)
            },
        );
        self.insert(packet_type, config, call)
    }

    /// Register a handler receiving a primitive array
    pub fn append_array<P, F, Fut>(&self, packet_type: &str, config: PipelineConfig, handler: F) -> Result<HandlerId>
    where
        P: Primitive,
        F: Fn(PacketHeader, Connection, Vec<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let call: Arc<ErasedHandler> = Arc::new(
            move |header: &PacketHeader,
                  conn: &Connection,
                  payload: &Bytes,
                  config: &PipelineConfig,
                  pipeline: &TransformPipeline|
                  -> Result<BoxFuture<Result<()>>> {
                let values: Vec<P> = pipeline.reverse_array(payload, config)?;
                let fut: BoxFuture<Result<()>> = Box::pin(handler(header.clone(), conn.clone(), values));
                Ok(fut)
            },
        );
        self.insert(packet_type, config, call)
    }

    /// Register a handler receiving the payload bytes untouched.
    ///
    /// This is the only kind of handler allowed for `Unmanaged` packets.
    pub fn append_raw<F, Fut>(&self, packet_type: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(PacketHeader, Connection, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let call: Arc<ErasedHandler> = Arc::new(
            move |header: &PacketHeader,
                  conn: &Connection,
                  payload: &Bytes,
                  _config: &PipelineConfig,
                  _pipeline: &TransformPipeline|
                  -> Result<BoxFuture<Result<()>>> {
                let fut: BoxFuture<Result<()>> =
                    Box::pin(handler(header.clone(), conn.clone(), payload.clone()));
                Ok(fut)
            },
        );
        self.insert(packet_type, raw_pipeline(), call)
    }

    fn insert(&self, packet_type: &str, config: PipelineConfig, call: Arc<ErasedHandler>) -> Result<HandlerId> {
        if packet_type.is_empty() {
            return Err(ProtocolError::PacketHandler("Packet type cannot be empty".into()));
        }
        if is_reserved(packet_type) && packet_type != UNMANAGED {
            return Err(ProtocolError::PacketHandler(format!(
                "'{packet_type}' is a reserved packet type"
            )));
        }

        let mut by_type = self
            .by_type
            .write()
            .map_err(|_| ProtocolError::PacketHandler(constants::ERR_HANDLER_LOCK.into()))?;

        let id = HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed));
        let entry = HandlerEntry { id, call };
        match by_type.get_mut(packet_type) {
            Some(set) => {
                if !set.config.is_compatible_with(&config) {
                    return Err(incompatible(packet_type, &config, &set.config));
                }
                set.entries.push(entry);
            }
            None => {
                by_type.insert(
                    packet_type.to_string(),
                    HandlerSet {
                        config,
                        entries: vec![entry],
                    },
                );
            }
        }
        debug!(packet_type, handler = id.0, "Handler registered");
        Ok(id)
    }

    /// Remove one registration. Returns false if it was not found.
    pub fn remove(&self, id: HandlerId) -> bool {
        let Ok(mut by_type) = self.by_type.write() else {
            return false;
        };
        let mut removed = false;
        by_type.retain(|_, set| {
            let before = set.entries.len();
            set.entries.retain(|e| e.id != id);
            removed |= set.entries.len() != before;
            !set.entries.is_empty()
        });
        removed
    }

    /// Remove every handler for `packet_type`
    pub fn remove_type(&self, packet_type: &str) -> bool {
        self.by_type
            .write()
            .map(|mut by_type| by_type.remove(packet_type).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut by_type) = self.by_type.write() {
            by_type.clear();
        }
    }

    /// Fails if `packet_type` is registered here with a pipeline that cannot
    /// decode what `config` describes
    pub(crate) fn ensure_compatible(&self, packet_type: &str, config: &PipelineConfig) -> Result<()> {
        match self.pipeline_for(packet_type) {
            Some(existing) if !existing.is_compatible_with(config) => {
                Err(incompatible(packet_type, config, &existing))
            }
            _ => Ok(()),
        }
    }

    pub fn contains(&self, packet_type: &str) -> bool {
        self.by_type
            .read()
            .map(|by_type| by_type.contains_key(packet_type))
            .unwrap_or(false)
    }

    /// Pipeline used to decode `packet_type`, if registered
    pub fn pipeline_for(&self, packet_type: &str) -> Option<PipelineConfig> {
        self.by_type
            .read()
            .ok()?
            .get(packet_type)
            .map(|set| set.config.clone())
    }

    /// Number of registered handlers across all packet types
    pub fn len(&self) -> usize {
        self.by_type
            .read()
            .map(|by_type| by_type.values().map(|s| s.entries.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self, packet_type: &str) -> Option<HandlerSet> {
        self.by_type.read().ok()?.get(packet_type).cloned()
    }
}

fn incompatible(packet_type: &str, requested: &PipelineConfig, existing: &PipelineConfig) -> ProtocolError {
    ProtocolError::PacketHandler(format!(
        "Handler for '{packet_type}' uses a pipeline incompatible with the existing registration \
         ({} with {:?} vs {} with {:?})",
        requested.serializer.name(),
        requested.processors,
        existing.serializer.name(),
        existing.processors
    ))
}
