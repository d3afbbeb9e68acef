//! Component wiring
//!
//! [`ShellBridge`] builds the session registry, pool, router, console state
//! machine, registrar and idle reaper from [`Settings`], and is what the chat
//! layer holds on to.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{JsonServerDirectory, ServerDirectory, Settings, SettingsError, UserId};
use crate::router::{Action, CommandRouter, InteractiveClassifier, OutboundMessage};
use crate::session::{
    ConnectionPool, ConsoleModeFsm, IdleReaper, ReapEvent, Registrar, SessionRegistry,
};
use crate::ssh::{Connector, HostKeyPolicy, HostKeyVerifier, SshConnector, SshError};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Host key setup failed: {0}")]
    HostKeys(#[from] SshError),
}

pub struct ShellBridge {
    settings: Settings,
    directory: Arc<dyn ServerDirectory>,
    pool: Arc<ConnectionPool>,
    router: Arc<CommandRouter>,
    console: Arc<ConsoleModeFsm>,
    registrar: Arc<Registrar>,
    reaper: Arc<IdleReaper>,
    shutdown_tx: watch::Sender<bool>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShellBridge {
    /// Real SSH transport and the JSON server table named by `settings`
    pub fn from_settings(settings: Settings) -> Result<Self, BridgeError> {
        settings.validate()?;

        if settings.host_key_policy == HostKeyPolicy::AcceptAll {
            warn!("Host key policy is accept_all: server keys are not verified");
        }
        let verifier = HostKeyVerifier::new(settings.host_key_policy.clone())?;
        let connector = SshConnector::new(verifier)
            .with_port(settings.ssh_port)
            .with_timeout_secs(settings.connect_timeout_secs)
            .with_keepalive_secs(settings.keepalive_interval_secs)
            .with_pty_size(settings.pty_cols, settings.pty_rows);

        let directory = JsonServerDirectory::with_path(settings.servers_path()?);

        Ok(Self::new(settings, Arc::new(directory), Arc::new(connector)))
    }

    pub fn new(
        settings: Settings,
        directory: Arc<dyn ServerDirectory>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let pool = Arc::new(ConnectionPool::new(
            registry,
            connector,
            settings.connect_timeout(),
        ));
        let router = Arc::new(CommandRouter::new(
            pool.clone(),
            InteractiveClassifier::new(settings.interactive_programs.iter().cloned()),
            settings.idle_timeout(),
            settings.message_limit,
        ));
        let console = Arc::new(ConsoleModeFsm::new(
            router.clone(),
            directory.clone(),
            settings.idle_timeout(),
        ));
        let registrar = Arc::new(Registrar::new(pool.clone(), directory.clone()));
        let reaper = Arc::new(IdleReaper::new(
            pool.clone(),
            settings.idle_timeout(),
            settings.reap_interval(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            settings,
            directory,
            pool,
            router,
            console,
            registrar,
            reaper,
            shutdown_tx,
            reaper_task: Mutex::new(None),
        }
    }

    /// Start the idle reaper. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.reaper_task.lock();
        if task.is_some() {
            return;
        }
        *task = Some(self.reaper.clone().spawn(self.shutdown_tx.subscribe()));
        info!(
            "Shell bridge started (idle timeout {}s, reap interval {}s)",
            self.settings.idle_timeout_secs, self.settings.reap_interval_secs
        );
    }

    /// Stop the reaper and close every pooled connection
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.reaper_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Idle reaper ended abnormally: {}", e);
            }
        }
        self.pool.release_all().await;
        info!("Shell bridge stopped");
    }

    /// One-off command from outside console mode
    pub async fn run_command(
        &self,
        user_id: UserId,
        command: &str,
        sink: &mpsc::Sender<String>,
    ) -> Vec<OutboundMessage> {
        match self.directory.get(user_id).await {
            Some(profile) => self.router.dispatch(user_id, &profile, command, sink).await,
            None => vec![OutboundMessage::with_actions(
                "No server registered. Register one first.",
                &[Action::MainMenu],
            )],
        }
    }

    pub fn subscribe_reaps(&self) -> broadcast::Receiver<ReapEvent> {
        self.reaper.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn directory(&self) -> &Arc<dyn ServerDirectory> {
        &self.directory
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn console(&self) -> &Arc<ConsoleModeFsm> {
        &self.console
    }

    pub fn registrar(&self) -> &Arc<Registrar> {
        &self.registrar
    }
}
