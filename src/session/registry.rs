//! Session Registry
//!
//! One entry per user, each behind its own async mutex. Every read or
//! mutation of a user's session (dispatch, release, reaping, console
//! transitions) goes through that lock, so operations for one user are
//! serialized while different users proceed independently.
//!
//! Entries are created lazily and never removed: a task queued on an old
//! entry's lock could otherwise end up mutating an orphaned record.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::Session;
use crate::config::UserId;

type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, SessionSlot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: UserId) -> SessionSlot {
        // Clone out so the shard lock is released before awaiting
        self.sessions.entry(user_id).or_default().value().clone()
    }

    /// Wait for exclusive access to a user's session, creating it if needed
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<Session> {
        self.slot(user_id).lock_owned().await
    }

    /// `lock` for users that already have a session, never creating one
    pub async fn lock_existing(&self, user_id: UserId) -> Option<OwnedMutexGuard<Session>> {
        let slot = self.sessions.get(&user_id)?.value().clone();
        Some(slot.lock_owned().await)
    }

    /// Exclusive access if nobody else holds the user's session right now
    ///
    /// Returns `None` for unknown users as well.
    pub fn try_lock(&self, user_id: UserId) -> Option<OwnedMutexGuard<Session>> {
        let slot = self.sessions.get(&user_id)?.value().clone();
        slot.try_lock_owned().ok()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    /// Snapshot of the users that currently have an entry
    pub fn user_ids(&self) -> Vec<UserId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
