//! TCP listener: accepts sockets and hands each one to the handshake.

use crate::comms::Shared;
use crate::connection::info::ApplicationLayerProtocol;
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::handshake;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{debug, error, info, instrument, warn};

/// A running accept loop
pub(crate) struct ListenerHandle {
    local_addr: SocketAddr,
    alp: ApplicationLayerProtocol,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn application_layer_protocol(&self) -> ApplicationLayerProtocol {
        self.alp
    }

    /// Stop accepting. Established connections are left open.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            debug!(error = %e, "Accept loop ended abnormally");
        }
        info!(address = %self.local_addr, "Stopped listening");
    }
}

/// Bind `addr` and start accepting connections in the background
#[instrument(skip(shared))]
pub(crate) async fn start_listener(
    shared: &Arc<Shared>,
    addr: SocketAddr,
    alp: ApplicationLayerProtocol,
) -> Result<ListenerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, ?alp, "Listening for connections");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(accept_loop(
        Arc::downgrade(shared),
        TcpListenerStream::new(listener),
        alp,
        shutdown_rx,
    ));

    Ok(ListenerHandle {
        local_addr,
        alp,
        shutdown_tx,
        task,
    })
}

async fn accept_loop(
    shared: Weak<Shared>,
    mut incoming: TcpListenerStream,
    alp: ApplicationLayerProtocol,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return,

            next = incoming.next() => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                match next {
                    Some(Ok(stream)) => accept(&shared, stream, alp),
                    Some(Err(e)) => error!(error = %e, "Error accepting connection"),
                    None => return,
                }
            }
        }
    }
}

fn accept(shared: &Arc<Shared>, stream: TcpStream, alp: ApplicationLayerProtocol) {
    let max_connections = shared.config().listener.max_connections;
    if shared.registry.len() >= max_connections {
        warn!(max_connections, "Connection limit reached, rejecting connection");
        return;
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (conn, reader) = match Connection::from_stream(shared, stream, true, alp) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "Failed to set up accepted socket");
            return;
        }
    };

    debug!(connection = %conn, "Accepted connection");
    let shared = shared.clone();
    tokio::spawn(async move {
        // Failures are logged and counted by the handshake
        let _ = handshake::establish(&shared, &conn, reader).await;
    });
}
