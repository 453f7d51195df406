//! Relay Core - Shared domain types for the message relay
//!
//! This crate provides the domain types shared between the wire
//! protocol (relay-protocol) and the daemon (relayd):
//! - `AccountName` - validated client account identifier
//! - storage records (`KnownUser`, `ActiveSession`, `LoginRecord`)
//! - the `Storage` trait consumed by the daemon, plus `MemoryStorage`
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod account;
pub mod error;
pub mod record;
pub mod storage;

// Re-exports for convenience
pub use account::{AccountName, MAX_ACCOUNT_NAME_LEN};
pub use error::{DomainError, DomainResult};
pub use record::{ActiveSession, KnownUser, LoginRecord};
pub use storage::{MemoryStorage, Storage, StorageError, StorageResult};
