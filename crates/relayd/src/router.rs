//! Pending-message router.
//!
//! Messages accepted during an iteration are held here and resolved once,
//! at the end of that iteration, against the registry and the set of
//! connections that polled writable. Nothing carries over: a message that
//! cannot be delivered now is dropped.

use std::collections::HashSet;

use relay_protocol::ChatMessage;
use tracing::{debug, error};

use crate::registry::Registry;
use crate::server::ConnectionId;

/// Outcome of routing one pending message.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Destination is registered and writable this iteration.
    Deliver {
        connection: ConnectionId,
        message: ChatMessage,
    },

    /// Destination is registered but did not poll writable. The caller
    /// treats the destination as gone.
    DestinationLost {
        connection: ConnectionId,
        message: ChatMessage,
    },

    /// Nobody is registered under the destination name.
    UnknownDestination { message: ChatMessage },
}

/// Holds messages until the end of the current iteration.
#[derive(Debug, Default)]
pub struct MessageRouter {
    pending: Vec<ChatMessage>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, message: ChatMessage) {
        debug!(
            from = %message.sender,
            to = %message.destination,
            "Message queued"
        );
        self.pending.push(message);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resolves every pending message, in arrival order, and empties the
    /// pending set.
    pub fn flush(&mut self, registry: &Registry, writable: &HashSet<ConnectionId>) -> Vec<Route> {
        self.pending
            .drain(..)
            .map(|message| match registry.lookup(&message.destination) {
                Some(connection) if writable.contains(&connection) => {
                    Route::Deliver { connection, message }
                }
                Some(connection) => Route::DestinationLost { connection, message },
                None => {
                    error!(
                        from = %message.sender,
                        to = %message.destination,
                        "Destination not registered, message dropped"
                    );
                    Route::UnknownDestination { message }
                }
            })
            .collect()
    }
}
