//! Command Router
//!
//! Runs a user's command over their pooled connection. Commands naming a
//! full-screen program get a pseudo-terminal and stream output to a sink as
//! it arrives; everything else runs to completion on an exec channel. Every
//! failure comes back as message text, never as an error.

pub mod classify;
pub mod format;
pub mod terminal;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use classify::InteractiveClassifier;
pub use format::{fence, render, split_message, Action, OutboundMessage, CONSOLE_ACTIONS};
pub use terminal::TerminalDecoder;

use crate::config::{ServerProfile, UserId};
use crate::session::{format_duration, ConnectionPool, Session};
use crate::ssh::{RemoteConnection, SshError};

enum Outcome {
    Batch(String),
    Interactive { finished: bool },
}

pub struct CommandRouter {
    pool: Arc<ConnectionPool>,
    classifier: InteractiveClassifier,
    idle_timeout: Duration,
    message_limit: usize,
}

impl CommandRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        classifier: InteractiveClassifier,
        idle_timeout: Duration,
        message_limit: usize,
    ) -> Self {
        Self {
            pool,
            classifier,
            idle_timeout,
            message_limit,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn classifier(&self) -> &InteractiveClassifier {
        &self.classifier
    }

    /// Run `command` for `user_id`, waiting for any command already in flight
    /// for the same user
    ///
    /// Interactive output is pushed to `sink` while the program runs; the
    /// returned messages carry the final result.
    pub async fn dispatch(
        &self,
        user_id: UserId,
        profile: &ServerProfile,
        command: &str,
        sink: &mpsc::Sender<String>,
    ) -> Vec<OutboundMessage> {
        let mut session = self.pool.registry().lock(user_id).await;
        self.dispatch_locked(user_id, &mut session, profile, command, sink)
            .await
    }

    /// `dispatch` for a caller already holding the user's session lock
    pub async fn dispatch_locked(
        &self,
        user_id: UserId,
        session: &mut Session,
        profile: &ServerProfile,
        command: &str,
        sink: &mpsc::Sender<String>,
    ) -> Vec<OutboundMessage> {
        let command = command.trim();
        if command.is_empty() {
            return vec![OutboundMessage::with_actions(
                "Empty command, nothing to run.",
                CONSOLE_ACTIONS,
            )];
        }

        let conn = match self.pool.acquire_locked(user_id, session, profile).await {
            Ok(conn) => conn,
            Err(e) => {
                return vec![OutboundMessage::with_actions(
                    format!("Connection error: {}", e),
                    CONSOLE_ACTIONS,
                )]
            }
        };

        let result = if self.classifier.is_interactive(command) {
            self.run_interactive(user_id, conn.as_ref(), command, sink)
                .await
                .map(|finished| Outcome::Interactive { finished })
        } else {
            self.run_batch(user_id, conn.as_ref(), command)
                .await
                .map(Outcome::Batch)
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Command for user {} failed: {}", user_id, e);
                if e.is_transport_lost() || !conn.is_active() {
                    self.pool.release_locked(user_id, session).await;
                }
                return vec![OutboundMessage::with_actions(
                    format!("Command failed: {}", e),
                    CONSOLE_ACTIONS,
                )];
            }
        };

        session.touch();
        let age = session.session_age(Instant::now()).unwrap_or_default();

        let body = match outcome {
            Outcome::Batch(output) => fence(&output),
            Outcome::Interactive { finished: true } => format!("`{}` finished.", command),
            Outcome::Interactive { finished: false } => format!(
                "`{}` stopped after {} without finishing.",
                command,
                format_duration(self.idle_timeout)
            ),
        };
        let text = format!("{}\n\nSession time: {}", body, format_duration(age));

        render(&text, CONSOLE_ACTIONS, self.message_limit)
    }

    /// stdout if there is any, else stderr, else nothing
    async fn run_batch(
        &self,
        user_id: UserId,
        conn: &dyn RemoteConnection,
        command: &str,
    ) -> Result<String, SshError> {
        debug!("Batch command for user {}: {}", user_id, command);
        let output = conn.exec(command).await?;

        if !output.stdout.is_empty() {
            Ok(output.stdout)
        } else {
            Ok(output.stderr)
        }
    }

    /// Stream terminal output until the program ends or the idle budget runs
    /// out. Returns whether the program ended on its own.
    async fn run_interactive(
        &self,
        user_id: UserId,
        conn: &dyn RemoteConnection,
        command: &str,
        sink: &mpsc::Sender<String>,
    ) -> Result<bool, SshError> {
        info!("Interactive command for user {}: {}", user_id, command);
        let mut channel = conn.open_interactive(command).await?;
        let deadline = Instant::now() + self.idle_timeout;
        let mut decoder = TerminalDecoder::new();
        let mut sink_open = true;

        let finished = loop {
            match tokio::time::timeout_at(deadline, channel.next_output()).await {
                Ok(Some(bytes)) => {
                    let text = decoder.feed(&bytes);
                    if !sink_open || text.trim().is_empty() {
                        continue;
                    }
                    for chunk in split_message(&text, self.message_limit) {
                        if sink.send(chunk).await.is_err() {
                            debug!("Output sink for user {} closed", user_id);
                            sink_open = false;
                            break;
                        }
                    }
                }
                Ok(None) => break true,
                Err(_) => {
                    info!(
                        "Interactive command for user {} hit the idle deadline",
                        user_id
                    );
                    break false;
                }
            }
        };

        channel.close().await;
        Ok(finished)
    }
}
