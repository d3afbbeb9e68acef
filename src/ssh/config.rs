//! SSH Configuration

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ServerProfile;

/// How server host keys are checked
///
/// `AcceptAll` trusts whatever key the server presents, every time, and is
/// the default. Unverified accepts are logged at warn level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any key without verification
    #[default]
    AcceptAll,
    /// Pin the first key seen for each host for the lifetime of the process,
    /// reject a different key afterwards
    TrustOnFirstUse,
    /// Only accept hosts already present in a known_hosts file
    /// (defaults to ~/.ssh/known_hosts)
    KnownHosts {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

/// SSH connection configuration
#[derive(Clone)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Connection timeout in seconds
    pub timeout_secs: u64,

    /// Keepalive interval in seconds (0 disables keepalives)
    pub keepalive_interval_secs: u64,

    /// Terminal columns for interactive channels
    pub cols: u32,

    /// Terminal rows for interactive channels
    pub rows: u32,
}

impl SshConfig {
    pub fn from_profile(profile: &ServerProfile, port: u16) -> Self {
        Self {
            host: profile.host.clone(),
            port,
            username: profile.username.clone(),
            password: profile.secret.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            timeout_secs: 10,
            keepalive_interval_secs: 30,
            cols: 80,
            rows: 24,
        }
    }
}
