//! Persisted data types

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat-side identity of an operator
pub type UserId = i64;

/// Flat mapping persisted to `servers.json`
pub type ServerTable = HashMap<UserId, ServerProfile>;

/// The one server an operator has registered
///
/// Profiles are replaced wholesale on re-registration and never mutated in place.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Display name (`^[A-Za-z0-9_-]+$`, at least 3 characters)
    pub name: String,
    /// IPv4 or IPv6 literal
    pub host: String,
    /// Login user on the remote host
    pub username: String,
    /// Password used for authentication
    pub secret: String,
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// `user@host`, used in logs and user-facing messages
    pub fn target(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

// Keep the secret out of logs
impl fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProfile")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}
