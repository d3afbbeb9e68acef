//! Pooled SSH connections
//!
//! The session layer only sees the [`Connector`] / [`RemoteConnection`] /
//! [`InteractiveChannel`] traits. [`SshConnector`] is the russh-backed
//! implementation; tests plug in an instrumented fake transport.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::{debug, info};

use super::client::{HostKeyVerifier, SshClient};
use super::config::SshConfig;
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use crate::config::ServerProfile;

/// Captured result of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

/// Opens authenticated connections to registered servers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteConnection>, SshError>;
}

/// One live, authenticated SSH connection
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Unique id, for logs
    fn id(&self) -> &str;

    /// Whether the transport is still open. Must not do network I/O.
    fn is_active(&self) -> bool;

    /// Run `command` on a one-shot exec channel until it exits
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError>;

    /// Start `command` inside a shell on a pseudo-terminal
    async fn open_interactive(&self, command: &str)
        -> Result<Box<dyn InteractiveChannel>, SshError>;

    /// Graceful disconnect
    async fn close(&self) -> Result<(), SshError>;
}

/// Output stream of a program running on a pseudo-terminal
#[async_trait]
pub trait InteractiveChannel: Send {
    /// Next chunk of terminal output; `None` once the remote side is done
    async fn next_output(&mut self) -> Option<Vec<u8>>;

    async fn close(&mut self);
}

/// Connector producing russh connections
pub struct SshConnector {
    port: u16,
    timeout_secs: u64,
    keepalive_interval_secs: u64,
    cols: u32,
    rows: u32,
    verifier: HostKeyVerifier,
}

impl SshConnector {
    pub fn new(verifier: HostKeyVerifier) -> Self {
        let defaults = SshConfig::default();
        Self {
            port: defaults.port,
            timeout_secs: defaults.timeout_secs,
            keepalive_interval_secs: defaults.keepalive_interval_secs,
            cols: defaults.cols,
            rows: defaults.rows,
            verifier,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_keepalive_secs(mut self, keepalive_interval_secs: u64) -> Self {
        self.keepalive_interval_secs = keepalive_interval_secs;
        self
    }

    pub fn with_pty_size(mut self, cols: u32, rows: u32) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    fn ssh_config(&self, profile: &ServerProfile) -> SshConfig {
        SshConfig {
            timeout_secs: self.timeout_secs,
            keepalive_interval_secs: self.keepalive_interval_secs,
            cols: self.cols,
            rows: self.rows,
            ..SshConfig::from_profile(profile, self.port)
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteConnection>, SshError> {
        let config = self.ssh_config(profile);
        let (cols, rows) = (config.cols, config.rows);

        let handle = SshClient::new(config, self.verifier.clone()).connect().await?;

        let id = uuid::Uuid::new_v4().to_string();
        info!("SSH connection {} established to {}", id, profile.target());

        let controller = spawn_handle_owner_task(handle, id.clone());
        Ok(Arc::new(SshConnection {
            id,
            controller,
            cols,
            rows,
        }))
    }
}

pub struct SshConnection {
    id: String,
    controller: HandleController,
    cols: u32,
    rows: u32,
}

#[async_trait]
impl RemoteConnection for SshConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.controller.is_connected()
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        let mut channel = self.controller.open_session_channel().await?;

        debug!("Exec on {}: {}", self.id, command);

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to execute command: {}", e)))?;

        // Commands waiting on stdin would otherwise never finish
        channel
            .eof()
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to send EOF: {}", e)))?;

        let output = collect_exec_output(&mut channel).await;

        debug!(
            "Exec on {} completed: exit={:?} stdout_len={} stderr_len={}",
            self.id,
            output.exit_status,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }

    async fn open_interactive(
        &self,
        command: &str,
    ) -> Result<Box<dyn InteractiveChannel>, SshError> {
        let channel = self.controller.open_session_channel().await?;

        channel
            .request_pty(false, "xterm-256color", self.cols, self.rows, 0, 0, &[])
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        // The shell exits with the program, which closes the channel
        let line = format!("{}; exit\n", command);
        channel
            .data(line.as_bytes())
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to send command: {}", e)))?;

        info!("Interactive program started on {}: {}", self.id, command);
        Ok(Box::new(SshInteractiveChannel { channel }))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.controller.disconnect().await;
        Ok(())
    }
}

async fn collect_exec_output(channel: &mut Channel<Msg>) -> ExecOutput {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    // Exit status may arrive after EOF, so read until the channel closes
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            // ext=1 is stderr
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    }
}

struct SshInteractiveChannel {
    channel: Channel<Msg>,
}

#[async_trait]
impl InteractiveChannel for SshInteractiveChannel {
    async fn next_output(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { data } => return Some(data.to_vec()),
                ChannelMsg::ExtendedData { data, .. } => return Some(data.to_vec()),
                ChannelMsg::Eof | ChannelMsg::Close => return None,
                ChannelMsg::ExitStatus { exit_status } => {
                    debug!("Interactive program exited with {}", exit_status);
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
    }
}
