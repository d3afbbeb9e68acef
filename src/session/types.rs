//! Per-user session record

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ServerProfile;
use crate::ssh::RemoteConnection;

/// A live connection together with the profile it was opened for
#[derive(Clone)]
pub struct PooledConnection {
    pub conn: Arc<dyn RemoteConnection>,
    pub host: String,
    pub username: String,
}

impl PooledConnection {
    pub fn new(conn: Arc<dyn RemoteConnection>, profile: &ServerProfile) -> Self {
        Self {
            conn,
            host: profile.host.clone(),
            username: profile.username.clone(),
        }
    }

    /// Whether this connection was made for `profile`
    pub fn matches(&self, profile: &ServerProfile) -> bool {
        self.host == profile.host && self.username == profile.username
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.conn.id())
            .field("host", &self.host)
            .field("username", &self.username)
            .field("active", &self.conn.is_active())
            .finish()
    }
}

/// Connection state, activity time and console-mode flag of one user
///
/// Only ever accessed through the per-user lock in
/// [`SessionRegistry`](super::SessionRegistry).
#[derive(Debug, Default)]
pub struct Session {
    pub connection: Option<PooledConnection>,
    pub last_activity: Option<Instant>,
    pub session_start: Option<Instant>,
    pub console_mode: bool,
}

impl Session {
    /// Record activity now, starting the session clock if needed
    pub fn touch(&mut self) {
        let now = Instant::now();
        self.last_activity = Some(now);
        self.session_start.get_or_insert(now);
    }

    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_activity
            .map(|last| now.saturating_duration_since(last))
    }

    pub fn session_age(&self, now: Instant) -> Option<Duration> {
        self.session_start
            .map(|start| now.saturating_duration_since(start))
    }

    /// Clear everything, handing back the connection so the caller can close it
    pub fn reset(&mut self) -> Option<PooledConnection> {
        let connection = self.connection.take();
        self.last_activity = None;
        self.session_start = None;
        self.console_mode = false;
        connection
    }

    pub fn status(&self, idle_timeout: Duration, now: Instant) -> SessionStatus {
        let Some(idle_for) = self.idle_for(now) else {
            return SessionStatus::NoActiveSession;
        };
        SessionStatus::Active {
            console_mode: self.console_mode,
            connected: self
                .connection
                .as_ref()
                .is_some_and(|pooled| pooled.conn.is_active()),
            session_age: self.session_age(now).unwrap_or(idle_for),
            idle_for,
            remaining: idle_timeout.saturating_sub(idle_for),
        }
    }
}

/// What a status query reports for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    NoActiveSession,
    Active {
        console_mode: bool,
        connected: bool,
        session_age: Duration,
        idle_for: Duration,
        remaining: Duration,
    },
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active { .. })
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NoActiveSession => write!(f, "no active session"),
            SessionStatus::Active {
                session_age,
                remaining,
                ..
            } => write!(
                f,
                "session active for {}, idle timeout in {}",
                format_duration(*session_age),
                format_duration(*remaining)
            ),
        }
    }
}

/// `1h 2m 3s` / `4m 10s` / `7s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
