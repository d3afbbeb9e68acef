//! Connection Pool
//!
//! Keeps at most one live connection per user. `acquire` returns the pooled
//! connection untouched when its transport is still up and it was made for
//! the user's current profile; otherwise it dials a new one under the user's
//! session lock, so two concurrent dispatches can never both connect.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use super::types::{PooledConnection, Session};
use crate::config::{ServerProfile, UserId};
use crate::ssh::{Connector, RemoteConnection, SshError};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: SshError,
    },

    #[error("Connection to {target} timed out after {secs}s")]
    Timeout { target: String, secs: u64 },
}

pub struct ConnectionPool {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            connect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Pooled connection for `user_id`, connecting if there is no usable one
    pub async fn acquire(
        &self,
        user_id: UserId,
        profile: &ServerProfile,
    ) -> Result<Arc<dyn RemoteConnection>, ConnectionError> {
        let mut session = self.registry.lock(user_id).await;
        self.acquire_locked(user_id, &mut session, profile).await
    }

    /// `acquire` for a caller already holding the user's session lock
    pub async fn acquire_locked(
        &self,
        user_id: UserId,
        session: &mut Session,
        profile: &ServerProfile,
    ) -> Result<Arc<dyn RemoteConnection>, ConnectionError> {
        if let Some(pooled) = &session.connection {
            if pooled.conn.is_active() && pooled.matches(profile) {
                debug!("Reusing connection {} for user {}", pooled.conn.id(), user_id);
                return Ok(pooled.conn.clone());
            }
        }

        if let Some(stale) = session.connection.take() {
            info!(
                "Dropping connection {} for user {} (active: {}, host: {})",
                stale.conn.id(),
                user_id,
                stale.conn.is_active(),
                stale.host
            );
            self.discard(user_id, stale).await;
        }

        let target = profile.target();
        info!("Opening connection to {} for user {}", target, user_id);

        let conn = match tokio::time::timeout(self.connect_timeout, self.connector.connect(profile))
            .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(SshError::Timeout(_))) | Err(_) => {
                warn!("Connection to {} for user {} timed out", target, user_id);
                return Err(ConnectionError::Timeout {
                    target,
                    secs: self.connect_timeout.as_secs(),
                });
            }
            Ok(Err(source)) => {
                warn!("Connection to {} for user {} failed: {}", target, user_id, source);
                return Err(ConnectionError::Connect { target, source });
            }
        };

        session.connection = Some(PooledConnection::new(conn.clone(), profile));
        session.touch();
        Ok(conn)
    }

    /// Close and forget the user's connection. Idempotent.
    pub async fn release(&self, user_id: UserId) {
        let Some(mut session) = self.registry.lock_existing(user_id).await else {
            return;
        };
        self.release_locked(user_id, &mut session).await;
    }

    /// `release` for a caller already holding the user's session lock
    ///
    /// The record is cleared before the close is attempted, so a failing
    /// close still leaves the user without a pooled connection.
    pub async fn release_locked(&self, user_id: UserId, session: &mut Session) {
        let pooled = session.connection.take();
        session.last_activity = None;

        if let Some(pooled) = pooled {
            info!("Releasing connection {} for user {}", pooled.conn.id(), user_id);
            self.discard(user_id, pooled).await;
        }
    }

    /// Close a connection already taken out of its session record
    pub(crate) async fn discard(&self, user_id: UserId, pooled: PooledConnection) {
        if let Err(e) = pooled.conn.close().await {
            warn!(
                "Closing connection {} for user {} failed: {}",
                pooled.conn.id(),
                user_id,
                e
            );
        }
    }

    /// Close every pooled connection, waiting for in-flight commands
    pub async fn release_all(&self) {
        let users = self.registry.user_ids();
        info!("Releasing connections for {} users", users.len());
        for user_id in users {
            self.release(user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{profile, FakeConnector};

    fn pool_with(connector: &FakeConnector) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(connector.clone()),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_acquire_twice_reuses_connection() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);
        let web = profile("10.0.0.1");

        let first = pool.acquire(1, &web).await.unwrap();
        let second = pool.acquire(1, &web).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_acquire_sets_activity() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);

        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();

        let session = pool.registry().lock(1).await;
        assert!(session.last_activity.is_some());
        assert!(session.session_start.is_some());
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);
        let web = profile("10.0.0.1");

        let first = pool.acquire(1, &web).await.unwrap();
        connector.last_connection().unwrap().kill();

        let second = pool.acquire(1, &web).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.live(), 1);
    }

    #[tokio::test]
    async fn test_profile_change_forces_new_connection() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);

        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();
        pool.acquire(1, &profile("10.0.0.2")).await.unwrap();

        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.closes(), 1);
        assert_eq!(connector.live(), 1);
        assert_eq!(connector.last_connection().unwrap().host(), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let connector = FakeConnector::new();
        connector.fail_host("10.0.0.9");
        let pool = pool_with(&connector);

        let err = pool.acquire(1, &profile("10.0.0.9")).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Connect { .. }));
        assert!(err.to_string().contains("root@10.0.0.9"));

        let session = pool.registry().lock(1).await;
        assert!(session.connection.is_none());
        assert!(session.last_activity.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let connector = FakeConnector::new().with_connect_delay(Duration::from_secs(60));
        let pool = pool_with(&connector);

        let err = pool.acquire(1, &profile("10.0.0.1")).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Timeout { secs: 10, .. }));
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);

        pool.release(1).await;
        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();
        pool.release(1).await;
        pool.release(1).await;

        assert_eq!(connector.closes(), 1);
        assert_eq!(connector.live(), 0);
        let session = pool.registry().lock(1).await;
        assert!(session.connection.is_none());
        assert!(session.last_activity.is_none());
    }

    #[tokio::test]
    async fn test_release_clears_session_when_close_fails() {
        let connector = FakeConnector::new();
        connector.fail_close("10.0.0.1");
        let pool = pool_with(&connector);

        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();
        pool.release(1).await;

        assert_eq!(connector.closes(), 1);
        let session = pool.registry().lock(1).await;
        assert!(session.connection.is_none());
        assert!(session.last_activity.is_none());
        drop(session);

        // Next acquire dials again instead of reusing the broken connection
        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_release_unknown_user_adds_no_entry() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);

        pool.release(42).await;
        pool.release_all().await;

        assert!(pool.registry().is_empty());
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_single_connection() {
        let connector = FakeConnector::new().with_connect_delay(Duration::from_millis(200));
        let pool = Arc::new(pool_with(&connector));
        let web = profile("10.0.0.1");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let web = web.clone();
                tokio::spawn(async move { pool.acquire(1, &web).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.peak(), 1);
    }

    #[tokio::test]
    async fn test_release_all_closes_every_user() {
        let connector = FakeConnector::new();
        let pool = pool_with(&connector);

        pool.acquire(1, &profile("10.0.0.1")).await.unwrap();
        pool.acquire(2, &profile("10.0.0.2")).await.unwrap();
        assert_eq!(connector.live(), 2);

        pool.release_all().await;
        assert_eq!(connector.live(), 0);
    }
}
