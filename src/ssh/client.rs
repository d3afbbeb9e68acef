//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::config::{HostKeyPolicy, SshConfig};
use super::error::SshError;
use super::known_hosts::{HostKeyVerification, KnownHostsStore};

/// Host key checking mode handed to each handshake
///
/// The store is shared across connections: it holds the pins for
/// trust-on-first-use, or the loaded known_hosts entries.
#[derive(Clone)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    store: Arc<KnownHostsStore>,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy) -> Result<Self, SshError> {
        let store = match &policy {
            HostKeyPolicy::KnownHosts { path } => KnownHostsStore::load(path.as_deref())?,
            HostKeyPolicy::AcceptAll | HostKeyPolicy::TrustOnFirstUse => {
                KnownHostsStore::in_memory()
            }
        };
        Ok(Self {
            policy,
            store: Arc::new(store),
        })
    }

    pub fn policy(&self) -> &HostKeyPolicy {
        &self.policy
    }

    fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<bool, SshError> {
        if self.policy == HostKeyPolicy::AcceptAll {
            warn!(
                "Accepting host key for {}:{} without verification (fingerprint: {})",
                host,
                port,
                KnownHostsStore::fingerprint(key)
            );
            return Ok(true);
        }

        match self.store.verify(host, port, key) {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", host, port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => match self.policy {
                HostKeyPolicy::TrustOnFirstUse => {
                    info!(
                        "TOFU: Pinning host key for {}:{} (fingerprint: {})",
                        host, port, fingerprint
                    );
                    self.store.add_host(host, port, key);
                    Ok(true)
                }
                _ => {
                    warn!(
                        "Unknown host key for {}:{} (fingerprint: {}), rejecting",
                        host, port, fingerprint
                    );
                    Err(SshError::HostKeyRejected(format!(
                        "unknown host {}:{} (fingerprint {})",
                        host, port, fingerprint
                    )))
                }
            },
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                // Always reject changed keys
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}. POSSIBLE MITM ATTACK!",
                    host, port, expected_fingerprint, actual_fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} has changed (expected {}, got {})",
                    host, port, expected_fingerprint, actual_fingerprint
                )))
            }
        }
    }
}

pub struct SshClient {
    config: SshConfig,
    verifier: HostKeyVerifier,
}

impl SshClient {
    pub fn new(config: SshConfig, verifier: HostKeyVerifier) -> Self {
        Self { config, verifier }
    }

    /// Connect and authenticate, bounded by `timeout_secs` as a whole
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let target = format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        tokio::time::timeout(timeout, self.connect_inner())
            .await
            .map_err(|_| SshError::Timeout(format!("Connecting to {} timed out", target)))?
    }

    async fn connect_inner(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let keepalive = match self.config.keepalive_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let ssh_config = client::Config {
            // Idle reclamation is handled by the reaper
            inactivity_timeout: None,
            keepalive_interval: keepalive,
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler {
            host: self.config.host.clone(),
            port: self.config.port,
            verifier: self.verifier,
        };

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| match e {
                SshError::HostKeyRejected(_) => e,
                other => SshError::ConnectionFailed(other.to_string()),
            })?;

        debug!("SSH handshake completed");

        let authenticated = handle
            .authenticate_password(&self.config.username, &self.config.password)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", addr);

        Ok(handle)
    }
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: HostKeyVerifier,
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verifier
            .check(&self.host, self.port, server_public_key)
    }
}
