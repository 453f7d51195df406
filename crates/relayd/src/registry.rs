//! Name registry.
//!
//! Maps account names to the connection that claimed them, and back. The
//! two maps are kept in lockstep so that a name has at most one owner and
//! a connection owns at most one name.
//!
//! The registry is owned by the dispatch loop and never shared, so it has
//! no locking.

use std::collections::{BTreeSet, HashMap};

use relay_core::AccountName;
use thiserror::Error;

use crate::server::ConnectionId;

// ============================================================================
// Registry Errors
// ============================================================================

/// Reasons a registration is refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("name {name} is already registered by {owner}")]
    NameTaken {
        name: AccountName,
        owner: ConnectionId,
    },

    #[error("{connection} is already registered as {name}")]
    ConnectionAlreadyRegistered {
        connection: ConnectionId,
        name: AccountName,
    },
}

// ============================================================================
// Registry
// ============================================================================

/// Bidirectional name/connection map.
#[derive(Debug, Default)]
pub struct Registry {
    by_name: HashMap<AccountName, ConnectionId>,
    by_connection: HashMap<ConnectionId, AccountName>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `name` for `connection`.
    ///
    /// # Errors
    /// - `RegistryError::NameTaken` if any connection (including this one)
    ///   already owns `name`
    /// - `RegistryError::ConnectionAlreadyRegistered` if `connection` owns
    ///   a different name
    pub fn register(
        &mut self,
        name: AccountName,
        connection: ConnectionId,
    ) -> Result<(), RegistryError> {
        if let Some(owner) = self.by_name.get(&name) {
            return Err(RegistryError::NameTaken {
                name,
                owner: *owner,
            });
        }
        if let Some(existing) = self.by_connection.get(&connection) {
            return Err(RegistryError::ConnectionAlreadyRegistered {
                connection,
                name: existing.clone(),
            });
        }

        self.by_connection.insert(connection, name.clone());
        self.by_name.insert(name, connection);
        Ok(())
    }

    /// Releases `name`, returning the connection that held it.
    pub fn unregister(&mut self, name: &AccountName) -> Option<ConnectionId> {
        let connection = self.by_name.remove(name)?;
        self.by_connection.remove(&connection);
        Some(connection)
    }

    /// Releases whatever name `connection` holds.
    pub fn unregister_connection(&mut self, connection: ConnectionId) -> Option<AccountName> {
        let name = self.by_connection.remove(&connection)?;
        self.by_name.remove(&name);
        Some(name)
    }

    pub fn lookup(&self, name: &AccountName) -> Option<ConnectionId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, connection: ConnectionId) -> Option<&AccountName> {
        self.by_connection.get(&connection)
    }

    /// Registered names, sorted.
    pub fn members(&self) -> BTreeSet<AccountName> {
        self.by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
