//! Connection multiplexer.
//!
//! Owns the listening socket and the active set. Each loop iteration
//! makes one bounded accept attempt, then takes a zero-wait snapshot of
//! which connections are readable and which are writable.

use std::collections::{HashMap, HashSet};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::connection::{Connection, ConnectionId};

/// Readable and writable subsets of the active set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub readable: HashSet<ConnectionId>,
    pub writable: HashSet<ConnectionId>,
}

/// Listener plus every accepted connection.
#[derive(Debug)]
pub struct Multiplexer {
    listener: TcpListener,
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
    max_frame_bytes: usize,
}

impl Multiplexer {
    pub fn new(listener: TcpListener, max_frame_bytes: usize) -> Self {
        Self {
            listener,
            connections: HashMap::new(),
            next_id: 1,
            max_frame_bytes,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits up to `wait` for one new connection.
    ///
    /// Returns the new connection's id, or `None` when the wait ran out.
    /// The wait also ends early, with `None`, as soon as an existing
    /// connection has input, so the caller can service it. Accept errors
    /// are logged and count as no new connection.
    pub async fn accept_once(&mut self, wait: Duration) -> Option<ConnectionId> {
        let listener = &self.listener;
        let connections = &self.connections;
        let attempt = timeout(wait, async {
            tokio::select! {
                result = listener.accept() => Some(result),
                _ = any_readable(connections) => None,
            }
        })
        .await;

        let (stream, peer) = match attempt {
            Ok(Some(Ok(accepted))) => accepted,
            Ok(Some(Err(e))) => {
                error!(error = %e, "Failed to accept connection");
                return None;
            }
            Ok(None) | Err(_) => return None,
        };

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        info!(connection = %id, peer = %peer, "Client connected");

        self.connections
            .insert(id, Connection::new(id, stream, peer, self.max_frame_bytes));
        Some(id)
    }

    /// Reports which connections are ready right now, without waiting.
    ///
    /// An empty active set is not polled at all. A connection whose read
    /// readiness reports an error is listed as readable so the read that
    /// follows surfaces the error.
    pub async fn poll_readiness(&self) -> Readiness {
        if self.connections.is_empty() {
            return Readiness::default();
        }

        poll_fn(|cx| {
            let mut readiness = Readiness::default();
            for (id, conn) in &self.connections {
                if conn.poll_read_ready(cx).is_ready() {
                    readiness.readable.insert(*id);
                }
                if let Poll::Ready(Ok(())) = conn.poll_write_ready(cx) {
                    readiness.writable.insert(*id);
                }
            }
            Poll::Ready(readiness)
        })
        .await
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Takes a connection out of the active set.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            debug!(connection = %id, remaining = self.connections.len(), "Connection removed");
        }
        removed
    }

    /// Ids of the active set, in accept order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Resolves once any connection has input. Never resolves for an empty set.
async fn any_readable(connections: &HashMap<ConnectionId, Connection>) {
    poll_fn(|cx| {
        let mut ready = false;
        for conn in connections.values() {
            ready |= conn.poll_read_ready(cx).is_ready();
        }
        if ready {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    })
    .await
}
