//! Records kept by the storage layer.
//!
//! These are plain values handed out by [`crate::Storage`] queries. The
//! daemon never holds on to them; the administrative console prints them.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountName;

/// Every name that has ever logged in, with its most recent login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownUser {
    pub name: AccountName,
    pub last_login: DateTime<Utc>,
}

/// A currently registered client.
///
/// One exists per live name; created on successful registration and
/// removed on logout or forced disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub name: AccountName,
    pub ip: IpAddr,
    pub port: u16,
    pub connected_since: DateTime<Utc>,
}

/// Append-only login history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub name: AccountName,
    pub login_time: DateTime<Utc>,
    pub ip: IpAddr,
    pub port: u16,
}
