//! Storage interface for login and session records.
//!
//! The relay treats storage as a synchronous, thread-safe collaborator:
//! the dispatch loop writes through it (`user_login` / `user_logout`) and
//! the administrative console reads from it. Nothing else is shared
//! between those two threads.
//!
//! # Failure Policy
//!
//! Calls are never retried. An error is fatal to the operation that made
//! the call; the caller decides what that means (the daemon drops the
//! connection that triggered it).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::{AccountName, ActiveSession, KnownUser, LoginRecord};

// ============================================================================
// Storage Errors
// ============================================================================

/// Errors surfaced by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backend's internal state can no longer be trusted.
    #[error("storage state poisoned")]
    Poisoned,

    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// Storage Trait
// ============================================================================

/// Persistence collaborator consumed by the daemon.
///
/// Implementations must be safe to call from the dispatch thread and the
/// console thread at the same time.
pub trait Storage: Send + Sync {
    /// Records a successful registration.
    ///
    /// Upserts the known-user entry, opens an active session and appends a
    /// history record.
    fn user_login(&self, name: &AccountName, ip: IpAddr, port: u16) -> StorageResult<()>;

    /// Closes the active session for `name`. Unknown names are a no-op.
    fn user_logout(&self, name: &AccountName) -> StorageResult<()>;

    /// Every name that has ever logged in, with its last login time.
    fn users_list(&self) -> StorageResult<Vec<KnownUser>>;

    /// Currently registered clients.
    fn active_users_list(&self) -> StorageResult<Vec<ActiveSession>>;

    /// Login history, optionally restricted to one name.
    fn login_history(&self, name: Option<&AccountName>) -> StorageResult<Vec<LoginRecord>>;
}

// ============================================================================
// In-Memory Storage
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<AccountName, KnownUser>,
    active: HashMap<AccountName, ActiveSession>,
    history: Vec<LoginRecord>,
}

/// Process-local storage backend.
///
/// Contents live as long as the process; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl Storage for MemoryStorage {
    fn user_login(&self, name: &AccountName, ip: IpAddr, port: u16) -> StorageResult<()> {
        let now = Utc::now();
        let mut tables = self.tables()?;

        tables
            .users
            .entry(name.clone())
            .and_modify(|user| user.last_login = now)
            .or_insert_with(|| KnownUser {
                name: name.clone(),
                last_login: now,
            });

        tables.active.insert(
            name.clone(),
            ActiveSession {
                name: name.clone(),
                ip,
                port,
                connected_since: now,
            },
        );

        tables.history.push(LoginRecord {
            name: name.clone(),
            login_time: now,
            ip,
            port,
        });

        debug!(name = %name, ip = %ip, port, "Recorded login");
        Ok(())
    }

    fn user_logout(&self, name: &AccountName) -> StorageResult<()> {
        let mut tables = self.tables()?;
        if tables.active.remove(name).is_some() {
            debug!(name = %name, "Recorded logout");
        }
        Ok(())
    }

    fn users_list(&self) -> StorageResult<Vec<KnownUser>> {
        let tables = self.tables()?;
        let mut users: Vec<KnownUser> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    fn active_users_list(&self) -> StorageResult<Vec<ActiveSession>> {
        let tables = self.tables()?;
        let mut active: Vec<ActiveSession> = tables.active.values().cloned().collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    fn login_history(&self, name: Option<&AccountName>) -> StorageResult<Vec<LoginRecord>> {
        let tables = self.tables()?;
        Ok(tables
            .history
            .iter()
            .filter(|record| name.map_or(true, |n| &record.name == n))
            .cloned()
            .collect())
    }
}
