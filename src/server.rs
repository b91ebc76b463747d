//! TCP server for handling echo connections.
//!
//! Accepts incoming connections forever and hands each one to its own task,
//! so a slow client or a slow TLS handshake never holds up acceptance.

use crate::config::Config;
use crate::echo::Termination;
use crate::listener::{Accept, Listener};
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, error, info, trace};

/// Server instance
pub struct Server<L = Listener> {
    listener: L,
    buffer_size: usize,
    nodelay: bool,
    connection_limit: Option<Arc<Semaphore>>,
}

impl<L: Accept> Server<L> {
    /// Create a new server around an already bound listener
    pub fn new(listener: L, config: &Config) -> Self {
        Server {
            listener,
            buffer_size: config.buffer_size,
            nodelay: config.nodelay,
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
        }
    }

    /// Begin accepting connections. Only returns if the admission gate is
    /// closed, which never happens in normal operation.
    pub async fn run(self) -> Result<(), AcquireError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(address = %addr, tls = self.listener.is_tls(), "Server listening");
        }

        // Diagnostic numbering only; owned by this loop
        let mut accepted: u64 = 0;

        loop {
            // Wait for a connection slot
            let permit = match self.connection_limit {
                Some(ref limit) => Some(limit.clone().acquire_owned().await?),
                None => None,
            };

            let (incoming, local, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            accepted += 1;
            info!("{}: {} <-> {}", accepted, local, peer);

            if let Err(e) = incoming.set_nodelay(self.nodelay) {
                trace!(conn = accepted, error = %e, "Failed to set TCP_NODELAY");
            }

            let buffer_size = self.buffer_size;
            let conn = accepted;
            tokio::spawn(async move {
                match incoming.serve(buffer_size).await {
                    Ok(summary) => match summary.termination {
                        Termination::Eof => debug!(
                            conn,
                            peer = %peer,
                            bytes = summary.bytes_echoed,
                            reads = summary.reads,
                            write_failures = summary.write_failures,
                            "Connection closed"
                        ),
                        Termination::ReadFailed(e) => debug!(
                            conn,
                            peer = %peer,
                            bytes = summary.bytes_echoed,
                            error = %e,
                            "Connection error"
                        ),
                    },
                    Err(e) => debug!(conn, peer = %peer, error = %e, "TLS handshake failed"),
                }
                drop(permit);
            });
        }
    }
}
