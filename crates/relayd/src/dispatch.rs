//! Request dispatch.
//!
//! The [`Dispatcher`] owns the registry and the pending-message router and
//! turns decoded requests into [`ConnectionAction`]s. It performs no I/O of
//! its own: the server loop executes the returned actions against the
//! sockets.
//!
//! Every path that ends a connection goes through one place, which
//! releases the connection's name and records the logout. A registered
//! client therefore logs out exactly once however it leaves.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Storage failures end the triggering connection, never the loop

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::{AccountName, Storage};
use relay_protocol::{
    decode_request, ChatMessage, ClientRequest, DecodeError, ServerResponse,
    ERROR_ALREADY_REGISTERED, ERROR_MALFORMED, ERROR_NAME_TAKEN, ERROR_NOT_OWNER,
};
use tracing::{debug, info, warn};

use crate::registry::{Registry, RegistryError};
use crate::router::{MessageRouter, Route};
use crate::server::ConnectionId;

// ============================================================================
// Actions
// ============================================================================

/// Why a connection is being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Presence lost a name conflict
    NameTaken,
    /// Client sent `exit`
    Exit,
    /// Client sent something that is not an envelope
    Unparseable,
    /// Recording the login failed
    StorageFailure,
    /// Peer closed the socket
    Disconnected,
    /// Read or write failed
    Io(String),
    /// Client was a message destination but not writable
    DestinationUnwritable,
    /// Server is stopping
    Shutdown,
}

impl CloseReason {
    /// Whether queued output should be flushed before the socket closes.
    pub fn flushes_output(&self) -> bool {
        !matches!(
            self,
            Self::Disconnected | Self::Io(_) | Self::DestinationUnwritable
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTaken => write!(f, "name already taken"),
            Self::Exit => write!(f, "client exit"),
            Self::Unparseable => write!(f, "unparseable envelope"),
            Self::StorageFailure => write!(f, "storage failure"),
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::Io(error) => write!(f, "I/O error: {error}"),
            Self::DestinationUnwritable => write!(f, "destination not writable"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Work for the server loop to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Send a status response
    Respond {
        connection: ConnectionId,
        response: ServerResponse,
    },

    /// Forward a message to its destination
    Deliver {
        connection: ConnectionId,
        message: ChatMessage,
    },

    /// Close the connection. Registry and storage are already updated.
    Close {
        connection: ConnectionId,
        reason: CloseReason,
    },
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Protocol state for every live connection.
pub struct Dispatcher {
    registry: Registry,
    router: MessageRouter,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            registry: Registry::new(),
            router: MessageRouter::new(),
            storage,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pending_messages(&self) -> usize {
        self.router.pending_len()
    }

    /// Decodes and handles one inbound frame.
    pub fn handle_frame(
        &mut self,
        connection: ConnectionId,
        peer: SocketAddr,
        frame: &[u8],
    ) -> Vec<ConnectionAction> {
        match decode_request(frame) {
            Ok(request) => self.handle_request(connection, peer, request),
            Err(error) => self.handle_decode_error(connection, &error),
        }
    }

    /// Answers a frame that could not be decoded.
    ///
    /// Both kinds get a 400. An unparseable frame also closes the
    /// connection, since nothing after it can be trusted to line up.
    pub fn handle_decode_error(
        &mut self,
        connection: ConnectionId,
        error: &DecodeError,
    ) -> Vec<ConnectionAction> {
        warn!(connection = %connection, error = %error, "Rejected request");

        let mut actions = vec![ConnectionAction::Respond {
            connection,
            response: ServerResponse::bad_request(ERROR_MALFORMED),
        }];
        if error.is_unparseable() {
            actions.push(self.release(connection, CloseReason::Unparseable));
        }
        actions
    }

    /// Applies a decoded request.
    pub fn handle_request(
        &mut self,
        connection: ConnectionId,
        peer: SocketAddr,
        request: ClientRequest,
    ) -> Vec<ConnectionAction> {
        debug!(connection = %connection, action = request.action(), "Handling request");

        match request {
            ClientRequest::Presence { user, .. } => {
                self.handle_presence(connection, peer, user.account_name)
            }
            ClientRequest::Message(message) => {
                self.router.enqueue(message);
                Vec::new()
            }
            ClientRequest::Exit { account_name, .. } => self.handle_exit(connection, account_name),
        }
    }

    fn handle_presence(
        &mut self,
        connection: ConnectionId,
        peer: SocketAddr,
        name: AccountName,
    ) -> Vec<ConnectionAction> {
        if let Some(current) = self.registry.name_of(connection) {
            warn!(
                connection = %connection,
                current = %current,
                requested = %name,
                "Presence from already registered connection"
            );
            return vec![ConnectionAction::Respond {
                connection,
                response: ServerResponse::bad_request(ERROR_ALREADY_REGISTERED),
            }];
        }

        match self.registry.register(name.clone(), connection) {
            Ok(()) => {}
            Err(RegistryError::NameTaken { owner, .. }) => {
                warn!(
                    connection = %connection,
                    owner = %owner,
                    name = %name,
                    "Name already taken"
                );
                return vec![
                    ConnectionAction::Respond {
                        connection,
                        response: ServerResponse::bad_request(ERROR_NAME_TAKEN),
                    },
                    ConnectionAction::Close {
                        connection,
                        reason: CloseReason::NameTaken,
                    },
                ];
            }
            Err(error @ RegistryError::ConnectionAlreadyRegistered { .. }) => {
                warn!(connection = %connection, error = %error, "Registration refused");
                return vec![ConnectionAction::Respond {
                    connection,
                    response: ServerResponse::bad_request(ERROR_ALREADY_REGISTERED),
                }];
            }
        }

        if let Err(error) = self.storage.user_login(&name, peer.ip(), peer.port()) {
            warn!(name = %name, error = %error, "Failed to record login");
            self.registry.unregister(&name);
            return vec![ConnectionAction::Close {
                connection,
                reason: CloseReason::StorageFailure,
            }];
        }

        info!(connection = %connection, name = %name, peer = %peer, "Client registered");
        vec![ConnectionAction::Respond {
            connection,
            response: ServerResponse::ok(),
        }]
    }

    fn handle_exit(&mut self, connection: ConnectionId, name: AccountName) -> Vec<ConnectionAction> {
        match self.registry.lookup(&name) {
            Some(owner) if owner != connection => {
                warn!(
                    connection = %connection,
                    owner = %owner,
                    name = %name,
                    "Exit for a name held by another connection"
                );
                vec![ConnectionAction::Respond {
                    connection,
                    response: ServerResponse::bad_request(ERROR_NOT_OWNER),
                }]
            }
            _ => vec![self.release(connection, CloseReason::Exit)],
        }
    }

    /// Forgets a connection that ended outside the protocol (EOF, I/O
    /// error, shutdown).
    pub fn connection_lost(
        &mut self,
        connection: ConnectionId,
        reason: CloseReason,
    ) -> ConnectionAction {
        self.release(connection, reason)
    }

    /// Resolves this iteration's pending messages against the connections
    /// that polled writable.
    pub fn flush_routes(&mut self, writable: &HashSet<ConnectionId>) -> Vec<ConnectionAction> {
        let routes = self.router.flush(&self.registry, writable);
        let mut lost = HashSet::new();
        let mut actions = Vec::with_capacity(routes.len());

        for route in routes {
            match route {
                Route::Deliver {
                    connection,
                    message,
                } => actions.push(ConnectionAction::Deliver {
                    connection,
                    message,
                }),
                Route::DestinationLost {
                    connection,
                    message,
                } => {
                    if lost.insert(connection) {
                        warn!(
                            connection = %connection,
                            to = %message.destination,
                            "Destination not writable, dropping client"
                        );
                        actions.push(self.release(connection, CloseReason::DestinationUnwritable));
                    }
                }
                Route::UnknownDestination { .. } => {}
            }
        }
        actions
    }

    fn release(&mut self, connection: ConnectionId, reason: CloseReason) -> ConnectionAction {
        if let Some(name) = self.registry.unregister_connection(connection) {
            if let Err(error) = self.storage.user_logout(&name) {
                warn!(name = %name, error = %error, "Failed to record logout");
            }
            info!(connection = %connection, name = %name, reason = %reason, "Client left");
        } else {
            debug!(connection = %connection, reason = %reason, "Unregistered connection closed");
        }
        ConnectionAction::Close { connection, reason }
    }
}
