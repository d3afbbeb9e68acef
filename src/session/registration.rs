//! Server registration
//!
//! `name:host:username:secret` is validated first, then proven by actually
//! connecting, and only then stored. The fresh connection stays pooled.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::pool::{ConnectionError, ConnectionPool};
use crate::config::{parse_registration, ServerDirectory, ServerProfile, UserId, ValidationError};

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub struct Registrar {
    pool: Arc<ConnectionPool>,
    directory: Arc<dyn ServerDirectory>,
}

impl Registrar {
    pub fn new(pool: Arc<ConnectionPool>, directory: Arc<dyn ServerDirectory>) -> Self {
        Self { pool, directory }
    }

    pub async fn register(
        &self,
        user_id: UserId,
        input: &str,
    ) -> Result<ServerProfile, RegistrationError> {
        let profile = parse_registration(input)?;

        {
            let mut session = self.pool.registry().lock(user_id).await;
            // Never reuse a connection made with the previous credentials
            self.pool.release_locked(user_id, &mut session).await;
            self.pool
                .acquire_locked(user_id, &mut session, &profile)
                .await?;
        }

        if let Err(e) = self.directory.put(user_id, profile.clone()).await {
            warn!("Saving server {} for user {} failed: {}", profile.name, user_id, e);
        }

        info!("User {} registered server {} ({})", user_id, profile.name, profile.target());
        Ok(profile)
    }
}
