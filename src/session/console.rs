//! Console mode state machine
//!
//! Per user, `Idle` or `Console`. In `Console` free text is a shell command
//! for the registered server; `exit` (any case) leaves, releasing the
//! connection. The reaper forces `Idle` asynchronously by resetting the
//! session record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

use super::pool::ConnectionPool;
use super::types::{format_duration, Session, SessionStatus};
use crate::config::{ServerDirectory, UserId};
use crate::router::{Action, CommandRouter, OutboundMessage, CONSOLE_ACTIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Idle,
    Console,
}

const EXIT_COMMAND: &str = "exit";

pub struct ConsoleModeFsm {
    router: Arc<CommandRouter>,
    directory: Arc<dyn ServerDirectory>,
    idle_timeout: Duration,
}

impl ConsoleModeFsm {
    pub fn new(
        router: Arc<CommandRouter>,
        directory: Arc<dyn ServerDirectory>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            router,
            directory,
            idle_timeout,
        }
    }

    fn pool(&self) -> &Arc<ConnectionPool> {
        self.router.pool()
    }

    pub async fn state(&self, user_id: UserId) -> ConsoleState {
        match self.pool().registry().lock_existing(user_id).await {
            Some(session) if session.console_mode => ConsoleState::Console,
            _ => ConsoleState::Idle,
        }
    }

    /// User picked "console" for their server. No connection is opened yet.
    pub async fn enter_console(&self, user_id: UserId) -> OutboundMessage {
        self.open_console(user_id, "Console mode").await
    }

    /// Back into console mode after leaving it, without re-registering
    pub async fn resume_console(&self, user_id: UserId) -> OutboundMessage {
        self.open_console(user_id, "Console resumed").await
    }

    async fn open_console(&self, user_id: UserId, heading: &str) -> OutboundMessage {
        let Some(profile) = self.directory.get(user_id).await else {
            return no_server_message();
        };

        self.pool().registry().lock(user_id).await.console_mode = true;
        info!("User {} entered console mode for {}", user_id, profile.target());

        OutboundMessage::with_actions(
            format!(
                "{} for {} ({}). Send a command to run it, or \"exit\" to leave.",
                heading,
                profile.name,
                profile.target()
            ),
            &[Action::Exit],
        )
    }

    /// Free text from the user
    ///
    /// `None` when the user is not in console mode and the text is not for us.
    pub async fn handle_text(
        &self,
        user_id: UserId,
        text: &str,
        sink: &mpsc::Sender<String>,
    ) -> Option<Vec<OutboundMessage>> {
        let mut session = self.pool().registry().lock_existing(user_id).await?;
        if !session.console_mode {
            return None;
        }

        if text.trim().eq_ignore_ascii_case(EXIT_COMMAND) {
            return Some(vec![self.exit_locked(user_id, &mut session).await]);
        }

        let Some(profile) = self.directory.get(user_id).await else {
            self.exit_locked(user_id, &mut session).await;
            return Some(vec![no_server_message()]);
        };

        Some(
            self.router
                .dispatch_locked(user_id, &mut session, &profile, text, sink)
                .await,
        )
    }

    /// Leave console mode, closing the connection if there is one
    pub async fn exit(&self, user_id: UserId) -> OutboundMessage {
        match self.pool().registry().lock_existing(user_id).await {
            Some(mut session) => self.exit_locked(user_id, &mut session).await,
            None => console_closed_message(),
        }
    }

    async fn exit_locked(&self, user_id: UserId, session: &mut Session) -> OutboundMessage {
        let pooled = session.reset();
        info!("User {} left console mode", user_id);
        if let Some(pooled) = pooled {
            self.pool().discard(user_id, pooled).await;
        }

        console_closed_message()
    }

    /// Reset the idle timer without running anything
    pub async fn extend_session(&self, user_id: UserId) -> OutboundMessage {
        let mut session = match self.pool().registry().lock_existing(user_id).await {
            Some(session) if session.last_activity.is_some() => session,
            _ => {
                return OutboundMessage::with_actions(
                    "No active session to extend.",
                    &[Action::MainMenu],
                )
            }
        };

        session.touch();
        OutboundMessage::with_actions(
            format!(
                "Session extended, idle timeout in {}.",
                format_duration(self.idle_timeout)
            ),
            CONSOLE_ACTIONS,
        )
    }

    pub async fn status(&self, user_id: UserId) -> SessionStatus {
        match self.pool().registry().lock_existing(user_id).await {
            Some(session) => session.status(self.idle_timeout, Instant::now()),
            None => SessionStatus::NoActiveSession,
        }
    }
}

fn console_closed_message() -> OutboundMessage {
    OutboundMessage::with_actions(
        "Console closed.",
        &[Action::ResumeConsole, Action::MainMenu],
    )
}

fn no_server_message() -> OutboundMessage {
    OutboundMessage::with_actions(
        "No server registered. Register one first.",
        &[Action::MainMenu],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonServerDirectory, ServerProfile};
    use crate::router::InteractiveClassifier;
    use crate::session::testing::{profile, FakeConnector};
    use crate::session::{IdleReaper, SessionRegistry};
    use tempfile::TempDir;

    const IDLE: Duration = Duration::from_secs(300);

    struct Harness {
        _dir: TempDir,
        connector: FakeConnector,
        directory: Arc<JsonServerDirectory>,
        fsm: ConsoleModeFsm,
        pool: Arc<ConnectionPool>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(JsonServerDirectory::with_path(dir.path().join("servers.json")));
        directory.put(1, profile("10.0.0.1")).await.unwrap();

        let connector = FakeConnector::new();
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(connector.clone()),
            Duration::from_secs(10),
        ));
        let router = Arc::new(CommandRouter::new(
            pool.clone(),
            InteractiveClassifier::new(["htop"]),
            IDLE,
            4096,
        ));
        let fsm = ConsoleModeFsm::new(router, directory.clone(), IDLE);

        Harness {
            _dir: dir,
            connector,
            directory,
            fsm,
            pool,
        }
    }

    fn sink() -> mpsc::Sender<String> {
        mpsc::channel(16).0
    }

    #[tokio::test]
    async fn test_idle_ignores_text() {
        let h = harness().await;
        assert_eq!(h.fsm.state(1).await, ConsoleState::Idle);
        assert!(h.fsm.handle_text(1, "ls", &sink()).await.is_none());
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_enter_console_does_not_connect() {
        let h = harness().await;
        let message = h.fsm.enter_console(1).await;

        assert!(message.text.contains("web1 (root@10.0.0.1)"));
        assert_eq!(message.actions, vec![Action::Exit]);
        assert_eq!(h.fsm.state(1).await, ConsoleState::Console);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_enter_console_requires_profile() {
        let h = harness().await;
        let message = h.fsm.enter_console(2).await;

        assert!(message.text.starts_with("No server registered"));
        assert_eq!(h.fsm.state(2).await, ConsoleState::Idle);
    }

    #[tokio::test]
    async fn test_text_in_console_runs_command() {
        let h = harness().await;
        h.connector.script_exec("hostname", "web1\n", "");
        h.fsm.enter_console(1).await;

        let messages = h.fsm.handle_text(1, "hostname", &sink()).await.unwrap();

        assert!(messages[0].text.starts_with("```\nweb1\n```"));
        assert_eq!(h.fsm.state(1).await, ConsoleState::Console);
    }

    #[tokio::test]
    async fn test_exit_closes_connection() {
        let h = harness().await;
        h.fsm.enter_console(1).await;
        h.fsm.handle_text(1, "ls", &sink()).await;
        assert_eq!(h.connector.live(), 1);

        let messages = h.fsm.handle_text(1, "  EXIT ", &sink()).await.unwrap();

        assert_eq!(
            messages[0].actions,
            vec![Action::ResumeConsole, Action::MainMenu]
        );
        assert_eq!(h.connector.live(), 0);
        assert_eq!(h.connector.closes(), 1);
        assert_eq!(h.fsm.state(1).await, ConsoleState::Idle);
        assert_eq!(h.fsm.status(1).await, SessionStatus::NoActiveSession);
        assert!(h.connector.exec_log().iter().all(|c| c != "EXIT"));
    }

    #[tokio::test]
    async fn test_exit_without_connection() {
        let h = harness().await;
        h.fsm.enter_console(1).await;

        let messages = h.fsm.handle_text(1, "exit", &sink()).await.unwrap();

        assert_eq!(messages[0].text, "Console closed.");
        assert_eq!(h.fsm.state(1).await, ConsoleState::Idle);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_exit_clears_session_when_close_fails() {
        let h = harness().await;
        h.connector.fail_close("10.0.0.1");
        h.fsm.enter_console(1).await;
        h.fsm.handle_text(1, "ls", &sink()).await;

        let message = h.fsm.exit(1).await;

        assert_eq!(message.text, "Console closed.");
        assert_eq!(h.connector.closes(), 1);
        assert_eq!(h.fsm.state(1).await, ConsoleState::Idle);
        assert_eq!(h.fsm.status(1).await, SessionStatus::NoActiveSession);
        assert!(h.pool.registry().lock(1).await.connection.is_none());
    }

    #[tokio::test]
    async fn test_queries_for_unknown_users_add_no_entries() {
        let h = harness().await;

        for user_id in 100..110 {
            assert_eq!(h.fsm.state(user_id).await, ConsoleState::Idle);
            assert_eq!(h.fsm.status(user_id).await, SessionStatus::NoActiveSession);
            assert!(h.fsm.handle_text(user_id, "ls", &sink()).await.is_none());
            assert!(h.fsm.extend_session(user_id).await.text.starts_with("No active session"));
            assert_eq!(h.fsm.exit(user_id).await.text, "Console closed.");
        }

        assert!(h.pool.registry().is_empty());
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_resume_after_exit() {
        let h = harness().await;
        h.fsm.enter_console(1).await;
        h.fsm.exit(1).await;

        let message = h.fsm.resume_console(1).await;
        assert!(message.text.starts_with("Console resumed"));
        assert_eq!(h.fsm.state(1).await, ConsoleState::Console);

        h.fsm.handle_text(1, "ls", &sink()).await.unwrap();
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reregistered_profile_is_used() {
        let h = harness().await;
        h.fsm.enter_console(1).await;
        h.fsm.handle_text(1, "ls", &sink()).await;

        h.directory
            .put(1, ServerProfile::new("db1", "10.0.0.2", "admin", "secret"))
            .await
            .unwrap();
        h.fsm.handle_text(1, "ls", &sink()).await;

        assert_eq!(h.connector.attempts(), 2);
        assert_eq!(h.connector.live(), 1);
        assert_eq!(h.connector.last_connection().unwrap().host(), "10.0.0.2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_returns_user_to_idle() {
        let h = harness().await;
        let reaper = IdleReaper::new(h.pool.clone(), IDLE, Duration::from_secs(60));
        h.fsm.enter_console(1).await;
        h.fsm.handle_text(1, "ls", &sink()).await;

        tokio::time::advance(IDLE + Duration::from_secs(1)).await;
        assert_eq!(reaper.reap_once().await.len(), 1);

        assert_eq!(h.fsm.state(1).await, ConsoleState::Idle);
        assert_eq!(h.fsm.status(1).await.to_string(), "no active session");
        assert_eq!(h.connector.live(), 0);
        assert!(h.fsm.handle_text(1, "ls", &sink()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_session_refreshes_timer() {
        let h = harness().await;
        assert!(h.fsm.extend_session(1).await.text.starts_with("No active session"));

        h.fsm.enter_console(1).await;
        h.fsm.handle_text(1, "ls", &sink()).await;
        tokio::time::advance(Duration::from_secs(200)).await;

        h.fsm.extend_session(1).await;

        match h.fsm.status(1).await {
            SessionStatus::Active {
                remaining,
                session_age,
                ..
            } => {
                assert_eq!(remaining, IDLE);
                assert_eq!(session_age, Duration::from_secs(200));
            }
            other => panic!("expected active session, got {:?}", other),
        }
    }
}
