//! Account names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Longest account name accepted, in characters.
pub const MAX_ACCOUNT_NAME_LEN: usize = 64;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Name a client registers under.
///
/// Exactly one live connection may own a given name at a time. The value
/// can only be constructed through [`AccountName::parse`], so a name held
/// anywhere in the relay is already known to be non-empty, free of control
/// characters, without surrounding whitespace and at most
/// [`MAX_ACCOUNT_NAME_LEN`] characters long.
///
/// Deserialization goes through the same validation, which lets the
/// protocol layer reject bad names as part of its typed parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl AccountName {
    /// Validates and wraps an account name.
    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();

        let reason = if value.is_empty() {
            Some("must not be empty".to_string())
        } else if value.chars().count() > MAX_ACCOUNT_NAME_LEN {
            Some(format!("longer than {MAX_ACCOUNT_NAME_LEN} characters"))
        } else if value.chars().any(char::is_control) {
            Some("contains control characters".to_string())
        } else if value.trim() != value {
            Some("has leading or trailing whitespace".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DomainError::InvalidAccountName { value, reason }),
            None => Ok(Self(value)),
        }
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AccountName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for AccountName {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl FromStr for AccountName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<AccountName> for String {
    fn from(name: AccountName) -> Self {
        name.0
    }
}

impl AsRef<str> for AccountName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
