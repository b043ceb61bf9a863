//! Connection registry: the two indexes (by peer identifier, by endpoint pair)
//! behind a single lock.
//!
//! The lock is a `std::sync::Mutex` and is never held across an `.await`.
//! Steps that need network I/O (liveness probes, closing a displaced
//! connection) return to the caller, who re-validates afterwards.

use crate::connection::info::{ConnectionState, NetworkId};
use crate::connection::Connection;
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct Indexes {
    by_id: HashMap<NetworkId, Connection>,
    /// remote endpoint -> local endpoint -> connection
    by_endpoint: HashMap<SocketAddr, HashMap<SocketAddr, Connection>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    indexes: Mutex<Indexes>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Indexes>> {
        self.indexes
            .lock()
            .map_err(|_| ProtocolError::Communication(constants::ERR_REGISTRY_LOCK.into()))
    }

    /// Close bookkeeping must run even after a panic elsewhere poisoned the lock
    fn lock_for_close(&self) -> MutexGuard<'_, Indexes> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn by_identifier(&self, id: &NetworkId) -> Option<Connection> {
        self.lock().ok()?.by_id.get(id).cloned()
    }

    pub fn by_remote_endpoint(&self, remote: SocketAddr) -> Vec<Connection> {
        self.lock()
            .map(|idx| {
                idx.by_endpoint
                    .get(&remote)
                    .map(|locals| locals.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn by_endpoint_pair(&self, remote: SocketAddr, local: SocketAddr) -> Option<Connection> {
        self.lock()
            .ok()?
            .by_endpoint
            .get(&remote)
            .and_then(|locals| locals.get(&local))
            .cloned()
    }

    /// Every registered connection, each listed once
    pub fn all(&self) -> Vec<Connection> {
        let Ok(idx) = self.lock() else {
            return Vec::new();
        };
        let mut out: Vec<Connection> = idx
            .by_endpoint
            .values()
            .flat_map(|locals| locals.values().cloned())
            .collect();
        for conn in idx.by_id.values() {
            if !out.iter().any(|c| c.ptr_eq(conn)) {
                out.push(conn.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the connection's endpoint pair.
    ///
    /// Entries left by shut-down connections are replaced. A live occupant is
    /// returned as `Err(existing)` so the caller can probe it outside the lock.
    pub fn try_add_by_endpoint(&self, conn: &Connection) -> Result<std::result::Result<(), Connection>> {
        let (remote, local) = conn.endpoint_key();
        let mut idx = self.lock()?;
        if conn.close_started() {
            return Err(ProtocolError::ConnectionSetup(constants::ERR_ALREADY_SHUTDOWN.into()));
        }
        let locals = idx.by_endpoint.entry(remote).or_default();
        match locals.get(&local) {
            Some(existing) if existing.ptr_eq(conn) => Ok(Ok(())),
            Some(existing) if existing.state() != ConnectionState::Shutdown => {
                Ok(Err(existing.clone()))
            }
            _ => {
                locals.insert(local, conn.clone());
                Ok(Ok(()))
            }
        }
    }

    /// Drop the endpoint entry if it still points at `conn`
    pub fn remove_endpoint_entry(&self, conn: &Connection) {
        let key = conn.endpoint_key();
        let mut idx = self.lock_for_close();
        remove_endpoint(&mut idx, key, conn);
    }

    /// Index `conn` by its peer identifier, returning the live connection it
    /// displaced, if any. The caller closes the displaced connection.
    pub fn add_by_identifier(&self, conn: &Connection) -> Result<Option<Connection>> {
        let id = conn.network_identifier().ok_or_else(|| {
            ProtocolError::ConnectionSetup(constants::ERR_NO_PEER_IDENTIFIER.into())
        })?;
        let mut idx = self.lock()?;
        if conn.close_started() {
            return Err(ProtocolError::ConnectionSetup(constants::ERR_ALREADY_SHUTDOWN.into()));
        }
        let previous = idx.by_id.insert(id, conn.clone());
        Ok(previous.filter(|old| !old.ptr_eq(conn) && !old.close_started()))
    }

    /// Mark `conn` as closing and drop its index entries.
    ///
    /// Returns true only for the first caller, which then runs the close side
    /// effects.
    pub fn begin_close(&self, conn: &Connection) -> bool {
        let mut idx = self.lock_for_close();
        if !conn.mark_close_started() {
            return false;
        }

        if let Some(id) = conn.network_identifier() {
            if idx.by_id.get(&id).is_some_and(|c| c.ptr_eq(conn)) {
                idx.by_id.remove(&id);
            }
        }
        remove_endpoint(&mut idx, conn.endpoint_key(), conn);
        debug!(connection = %conn, "Connection removed from registry");
        true
    }
}

fn remove_endpoint(idx: &mut Indexes, (remote, local): (SocketAddr, SocketAddr), conn: &Connection) {
    if let Some(locals) = idx.by_endpoint.get_mut(&remote) {
        if locals.get(&local).is_some_and(|c| c.ptr_eq(conn)) {
            locals.remove(&local);
        }
        if locals.is_empty() {
            idx.by_endpoint.remove(&remote);
        }
    }
}
