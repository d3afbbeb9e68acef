//! SSH module - handles SSH connections using the russh library
//!
//! # Features
//! - Password-authenticated connections with a bounded connect timeout
//! - Host key policies: accept-all, trust-on-first-use, known_hosts
//! - One-shot exec channels and PTY-backed interactive channels
//! - Single-owner task per russh handle (see `handle_owner`)

mod client;
mod config;
mod connection;
mod error;
mod handle_owner;
pub mod known_hosts;

pub use client::{ClientHandler, HostKeyVerifier, SshClient};
pub use config::{HostKeyPolicy, SshConfig};
pub use connection::{
    Connector, ExecOutput, InteractiveChannel, RemoteConnection, SshConnection, SshConnector,
};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
