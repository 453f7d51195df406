//! TCP relay server.
//!
//! The server runs a single dispatch loop that owns every socket, the
//! registry and the pending-message set. No per-client tasks are spawned.
//!
//! # Iteration
//!
//! ```text
//! ┌──────────────┐  bounded wait  ┌────────────────┐  zero wait
//! │ accept_once  │───────────────▶│ poll_readiness │──────────┐
//! └──────────────┘                └────────────────┘          │
//!        ▲                                                    ▼
//!        │        ┌──────────────┐   ┌─────────────────────────────┐
//!        └────────│ flush_routes │◀──│ flush outboxes, read frames │
//!                 └──────────────┘   └─────────────────────────────┘
//! ```
//!
//! Shutdown is requested through a `CancellationToken` and observed
//! between iterations; every remaining client is logged out on the way
//! down.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - A failing client is dropped and the loop continues

mod connection;
mod multiplexer;

pub use connection::{
    Connection, ConnectionError, ConnectionId, ReadStatus, CLOSE_FLUSH_TIMEOUT,
};
pub use multiplexer::{Multiplexer, Readiness};

use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::Storage;
use relay_protocol::{encode_line, ClientRequest};

use crate::config::ServerConfig;
use crate::dispatch::{CloseReason, ConnectionAction, Dispatcher};

/// Loop tuning that does not concern the listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub accept_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            accept_timeout: config.accept_timeout,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// The relay's dispatch loop.
#[derive(Debug)]
pub struct RelayServer {
    mux: Multiplexer,
    dispatcher: Dispatcher,
    accept_timeout: Duration,
    cancel_token: CancellationToken,
}

impl RelayServer {
    /// Binds the configured address.
    pub async fn bind(
        config: &ServerConfig,
        storage: Arc<dyn Storage>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.listen.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| ServerError::Bind { addr, error })?;
        Ok(Self::from_listener(
            listener,
            storage,
            ServerOptions::from(config),
            cancel_token,
        ))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(
        listener: TcpListener,
        storage: Arc<dyn Storage>,
        options: ServerOptions,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            mux: Multiplexer::new(listener, options.max_frame_bytes),
            dispatcher: Dispatcher::new(storage),
            accept_timeout: options.accept_timeout,
            cancel_token,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.mux.local_addr()?)
    }

    /// Runs the loop until the cancellation token fires.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Relay server listening");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                _ = self.mux.accept_once(self.accept_timeout) => {}
            }

            self.iterate().await;
        }

        self.cleanup().await;
        Ok(())
    }

    /// One pass over the active set after the accept attempt.
    async fn iterate(&mut self) {
        let Readiness { readable, writable } = self.mux.poll_readiness().await;

        // Output left over from earlier iterations
        let mut flushed = Vec::new();
        for id in sorted(&writable) {
            let Some(conn) = self.mux.get_mut(id) else {
                continue;
            };
            if !conn.has_pending_output() {
                continue;
            }
            if let Err(e) = conn.flush() {
                flushed.push(
                    self.dispatcher
                        .connection_lost(id, CloseReason::Io(e.to_string())),
                );
            }
        }
        self.execute(flushed).await;

        for id in sorted(&readable) {
            self.service(id).await;
        }

        // Connections closed during this iteration cannot take deliveries
        let writable: HashSet<ConnectionId> = writable
            .into_iter()
            .filter(|id| self.mux.contains(*id))
            .collect();
        let routed = self.dispatcher.flush_routes(&writable);
        self.execute(routed).await;
    }

    /// Reads and handles every complete frame from one readable connection.
    async fn service(&mut self, id: ConnectionId) {
        let Some(conn) = self.mux.get_mut(id) else {
            return;
        };
        let peer = conn.peer();

        let status = match conn.receive() {
            Ok(status) => status,
            Err(e) => {
                let lost = self.dispatcher.connection_lost(id, CloseReason::Io(e.to_string()));
                self.execute(vec![lost]).await;
                return;
            }
        };

        loop {
            let Some(conn) = self.mux.get_mut(id) else {
                // Closed by one of its own requests
                return;
            };
            let actions = match conn.next_frame() {
                Ok(Some(frame)) => self.dispatcher.handle_frame(id, peer, &frame),
                Ok(None) => break,
                Err(e) => self.dispatcher.handle_decode_error(id, &e),
            };
            self.execute(actions).await;
        }

        if status == ReadStatus::Closed && self.mux.contains(id) {
            let lost = self.dispatcher.connection_lost(id, CloseReason::Disconnected);
            self.execute(vec![lost]).await;
        }
    }

    /// Carries out dispatcher actions against the sockets.
    async fn execute(&mut self, actions: Vec<ConnectionAction>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::Respond {
                    connection,
                    response,
                } => {
                    if let Err(e) = self.send(connection, &response) {
                        queue.push_back(
                            self.dispatcher
                                .connection_lost(connection, CloseReason::Io(e.to_string())),
                        );
                    }
                }
                ConnectionAction::Deliver {
                    connection,
                    message,
                } => {
                    let from = message.sender.clone();
                    let to = message.destination.clone();
                    match self.send(connection, &ClientRequest::Message(message)) {
                        Ok(()) => info!(from = %from, to = %to, "Message delivered"),
                        Err(e) => {
                            warn!(from = %from, to = %to, error = %e, "Delivery failed");
                            queue.push_back(
                                self.dispatcher
                                    .connection_lost(connection, CloseReason::Io(e.to_string())),
                            );
                        }
                    }
                }
                ConnectionAction::Close { connection, reason } => {
                    if let Some(conn) = self.mux.remove(connection) {
                        info!(
                            connection = %connection,
                            peer = %conn.peer(),
                            reason = %reason,
                            "Client disconnected"
                        );
                        conn.close(reason.flushes_output()).await;
                    }
                }
            }
        }
    }

    fn send<T: Serialize>(&mut self, id: ConnectionId, value: &T) -> Result<(), ConnectionError> {
        let Some(conn) = self.mux.get_mut(id) else {
            debug!(connection = %id, "Dropping output for closed connection");
            return Ok(());
        };
        let line = encode_line(value)?;
        conn.send(&line)
    }

    /// Logs out and closes every remaining client.
    async fn cleanup(&mut self) {
        let actions: Vec<ConnectionAction> = self
            .mux
            .ids()
            .into_iter()
            .map(|id| self.dispatcher.connection_lost(id, CloseReason::Shutdown))
            .collect();
        self.execute(actions).await;
        info!("Server cleanup complete");
    }
}

fn sorted(ids: &HashSet<ConnectionId>) -> Vec<ConnectionId> {
    let mut ids: Vec<ConnectionId> = ids.iter().copied().collect();
    ids.sort();
    ids
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
