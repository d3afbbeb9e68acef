//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to
//! it through a cloneable `HandleController` that sends commands over an mpsc
//! channel, so the handle is never shared behind a lock held across `.await`.
//!
//! The owner task also watches the transport: once russh reports the
//! session closed (server hung up, keepalives exhausted) the task exits and
//! every controller reports `is_connected() == false` from then on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// How often the owner task checks whether russh has closed the session
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (exec or PTY/shell)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    closed: Arc<AtomicBool>,
}

impl HandleController {
    /// Controller over a raw command channel, without an owner task
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self {
            cmd_tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(SshError::from)
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Whether the owner task is running and the transport is open
    ///
    /// Purely local; never touches the network.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    connection_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let closed = Arc::new(AtomicBool::new(false));
    let closed_flag = closed.clone();

    tokio::spawn(async move {
        let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);

        info!("Handle owner task started for connection {}", connection_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            // Channel will be dropped, the server closes it
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for connection {}", connection_id);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for connection {}", connection_id);
                        break;
                    }
                },
                _ = liveness.tick() => {
                    if handle.is_closed() {
                        warn!("Transport closed for connection {}", connection_id);
                        break;
                    }
                }
            }
        }

        // === Cleanup phase ===
        closed_flag.store(true, Ordering::SeqCst);
        drain_pending_commands(&mut cmd_rx);

        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("Disconnect for {} returned {}", connection_id, e);
        }
        info!("Handle owner task terminated for connection {}", connection_id);
    });

    HandleController { cmd_tx, closed }
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}
