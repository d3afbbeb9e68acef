//! Idle Reaper
//!
//! Background task that periodically scans every session and tears down the
//! ones idle for longer than the configured budget: the connection is closed
//! and the record fully reset, which also drops the user out of console mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::pool::ConnectionPool;
use crate::config::UserId;

/// Emitted for every session the reaper closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapEvent {
    pub user_id: UserId,
    pub idle_for: Duration,
}

pub struct IdleReaper {
    pool: Arc<ConnectionPool>,
    idle_timeout: Duration,
    interval: Duration,
    events: broadcast::Sender<ReapEvent>,
}

impl IdleReaper {
    pub fn new(pool: Arc<ConnectionPool>, idle_timeout: Duration, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pool,
            idle_timeout,
            interval,
            events,
        }
    }

    /// Notifications for reaped sessions, e.g. to tell the user it expired
    pub fn subscribe(&self) -> broadcast::Receiver<ReapEvent> {
        self.events.subscribe()
    }

    /// One scan over a snapshot of all users
    ///
    /// Each user is reaped in its own task so a panic while closing one
    /// connection cannot stop the rest of the scan.
    pub async fn reap_once(&self) -> Vec<ReapEvent> {
        let users = self.pool.registry().user_ids();
        let mut tasks = Vec::with_capacity(users.len());

        for user_id in users {
            let pool = self.pool.clone();
            let idle_timeout = self.idle_timeout;
            tasks.push((
                user_id,
                tokio::spawn(async move { reap_user(&pool, user_id, idle_timeout).await }),
            ));
        }

        let mut reaped = Vec::new();
        for (user_id, task) in tasks {
            match task.await {
                Ok(Some(event)) => {
                    // No subscribers is fine
                    let _ = self.events.send(event.clone());
                    reaped.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!("Reaping session of user {} failed: {}", user_id, e),
            }
        }
        reaped
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            info!(
                "Idle reaper started (interval {:?}, idle timeout {:?})",
                self.interval, self.idle_timeout
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = self.reap_once().await;
                        if !reaped.is_empty() {
                            info!("Idle reaper closed {} sessions", reaped.len());
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Idle reaper stopped");
        })
    }
}

async fn reap_user(pool: &ConnectionPool, user_id: UserId, idle_timeout: Duration) -> Option<ReapEvent> {
    // A held lock means a command is in flight, so the user is not idle
    let Some(mut session) = pool.registry().try_lock(user_id) else {
        debug!("Session of user {} busy, skipping", user_id);
        return None;
    };

    let idle_for = session.idle_for(Instant::now())?;
    if idle_for <= idle_timeout {
        return None;
    }

    // Reset before closing so a failed close cannot leave the user in console mode
    let pooled = session.reset();
    info!(
        "Reaping idle session of user {} (idle for {}s)",
        user_id,
        idle_for.as_secs()
    );
    if let Some(pooled) = pooled {
        pool.discard(user_id, pooled).await;
    }

    Some(ReapEvent { user_id, idle_for })
}
