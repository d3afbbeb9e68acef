//! Runtime settings
//!
//! Loaded once at startup from a JSON file. Every field has a default, so a
//! missing file or a partial file is fine; a malformed file is not.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::storage::{servers_file, StorageError};
use crate::ssh::HostKeyPolicy;

/// Chat platforms reject messages longer than this
pub const MAX_MESSAGE_LIMIT: usize = 4096;

/// Settings load and validation errors
///
/// These are the only errors that should stop the process.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be greater than 0")]
    Zero { field: &'static str },

    #[error("message_limit must be at most {max}, got {got}")]
    MessageLimitTooLarge { got: usize, max: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Inactivity budget before a session's connection is reclaimed
    pub idle_timeout_secs: u64,

    /// Period of the idle reaper
    pub reap_interval_secs: u64,

    /// Bound on TCP connect + SSH handshake + authentication
    pub connect_timeout_secs: u64,

    /// SSH port used for every registered server
    pub ssh_port: u16,

    /// SSH keepalive interval for pooled connections
    pub keepalive_interval_secs: u64,

    /// Maximum characters per outbound chat message
    pub message_limit: usize,

    /// Programs that need a pseudo-terminal
    pub interactive_programs: Vec<String>,

    /// Pseudo-terminal size for interactive programs
    pub pty_cols: u32,
    pub pty_rows: u32,

    /// Server key verification; `accept_all` trusts any key without checking
    pub host_key_policy: HostKeyPolicy,

    /// Server table location (defaults to ~/.shellbridge/servers.json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers_file: Option<PathBuf>,
}

fn default_interactive_programs() -> Vec<String> {
    [
        "nano", "vim", "vi", "nvim", "emacs", "top", "htop", "btop", "atop", "iotop", "mc",
        "less", "more", "man", "nmtui", "alsamixer", "ncdu", "tmux", "screen", "watch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            reap_interval_secs: 60,
            connect_timeout_secs: 10,
            ssh_port: 22,
            keepalive_interval_secs: 30,
            message_limit: MAX_MESSAGE_LIMIT,
            interactive_programs: default_interactive_programs(),
            pty_cols: 80,
            pty_rows: 24,
            host_key_policy: HostKeyPolicy::default(),
            servers_file: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, using defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No settings file at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let non_zero = [
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("reap_interval_secs", self.reap_interval_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("message_limit", self.message_limit as u64),
            ("pty_cols", u64::from(self.pty_cols)),
            ("pty_rows", u64::from(self.pty_rows)),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::Zero { field: *field });
        }
        if self.message_limit > MAX_MESSAGE_LIMIT {
            return Err(SettingsError::MessageLimitTooLarge {
                got: self.message_limit,
                max: MAX_MESSAGE_LIMIT,
            });
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolved server table path
    pub fn servers_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.servers_file {
            Some(path) => Ok(path.clone()),
            None => Ok(servers_file()?),
        }
    }
}
