//! Host key store for SSH host key verification
//!
//! Backs both the `known_hosts` policy (file-loaded, read-only) and the
//! trust-on-first-use policy (in-memory pins, no file).

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::SshError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches a stored entry
    Verified,
    /// No entry for this host and key type
    Unknown { fingerprint: String },
    /// Key differs from the stored entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// Entry: (key_type, base64_key)
#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

pub struct KnownHostsStore {
    /// host -> keys (one per key type)
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
}

impl Default for KnownHostsStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl KnownHostsStore {
    /// Empty store, used for trust-on-first-use pins
    pub fn in_memory() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Store loaded from `path`, or from ~/.ssh/known_hosts when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, SshError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => dirs::home_dir()
                .map(|h| h.join(".ssh").join("known_hosts"))
                .unwrap_or_else(|| PathBuf::from("~/.ssh/known_hosts")),
        };

        let store = Self::in_memory();
        if !path.exists() {
            warn!("known_hosts file {:?} not found, every host will be rejected", path);
            return Ok(store);
        }

        let file = fs::File::open(&path)?;
        let count = store.load_lines(BufReader::new(file))?;
        info!("Loaded {} known host entries from {:?}", count, path);
        Ok(store)
    }

    fn load_lines(&self, reader: impl BufRead) -> Result<usize, SshError> {
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) are not supported
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(Self::normalize_hostname(hostname))
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        Ok(entry_count)
    }

    /// `[host]:port` -> `host`, lowercased
    fn normalize_hostname(host: &str) -> String {
        let host = host.trim_start_matches('[');
        if let Some(idx) = host.find("]:") {
            host[..idx].to_lowercase()
        } else {
            host.trim_end_matches(']').to_lowercase()
        }
    }

    /// Lookup key for host:port
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint of a public key
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_key_b64 = BASE64.encode(key.public_key_bytes());
        let actual_key_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();
        let entries = hosts
            .get(&lookup_key)
            .or_else(|| hosts.get(&host.to_lowercase()));

        let Some(entries) = entries else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == actual_key_type) {
            Some(entry) if entry.key_data == actual_key_b64 => {
                debug!("Host key verified for {} ({})", lookup_key, actual_key_type);
                HostKeyVerification::Verified
            }
            Some(entry) => {
                let expected_fingerprint = BASE64
                    .decode(&entry.key_data)
                    .map(|bytes| Self::fingerprint_bytes(&bytes))
                    .unwrap_or_else(|_| "unknown".to_string());
                warn!(
                    "HOST KEY CHANGED for {} ({})! Expected {}, got {}",
                    lookup_key, actual_key_type, expected_fingerprint, fingerprint
                );
                HostKeyVerification::Changed {
                    expected_fingerprint,
                    actual_fingerprint: fingerprint,
                }
            }
            None => {
                debug!(
                    "Host {} known but no {} key stored",
                    lookup_key, actual_key_type
                );
                HostKeyVerification::Unknown { fingerprint }
            }
        }
    }

    /// Pin a key in memory
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) {
        let lookup_key = Self::make_key(host, port);
        let entry = HostKeyEntry {
            key_type: key.algorithm().as_str().to_string(),
            key_data: BASE64.encode(key.public_key_bytes()),
        };
        debug!("Pinned {} key for {}", entry.key_type, lookup_key);
        self.hosts.write().entry(lookup_key).or_default().push(entry);
    }
}
