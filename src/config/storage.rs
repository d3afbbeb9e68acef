//! Server directory storage
//!
//! Handles reading/writing the per-user server table to disk.
//! Location: ~/.shellbridge/servers.json on macOS/Linux, %APPDATA%\ShellBridge on Windows

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::types::{ServerProfile, ServerTable, UserId};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server directory {0:?} could not be read, refusing to overwrite it")]
    NotLoaded(PathBuf),
}

/// Get the ShellBridge configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("ShellBridge"));
        }
        dirs::home_dir()
            .map(|home| home.join(".shellbridge"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".shellbridge"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the default servers file path
pub fn servers_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("servers.json"))
}

/// Maps a user to their registered server
#[async_trait]
pub trait ServerDirectory: Send + Sync {
    /// Look up the profile registered by `user_id`
    async fn get(&self, user_id: UserId) -> Option<ServerProfile>;

    /// Register or replace the profile for `user_id`
    ///
    /// The in-memory table is updated even when persisting fails, so an
    /// `Err` here only means the change will not survive a restart.
    async fn put(&self, user_id: UserId, profile: ServerProfile) -> Result<(), StorageError>;
}

/// JSON-file backed directory with an in-memory copy of the whole table
///
/// The file is read lazily on the first lookup after start and can be
/// re-read at any time with [`JsonServerDirectory::reload`].
pub struct JsonServerDirectory {
    path: PathBuf,
    table: RwLock<ServerTable>,
    loaded: AtomicBool,
    /// Serializes writers so renames land in call order
    write_lock: Mutex<()>,
}

impl JsonServerDirectory {
    /// Directory at the default location
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(servers_file()?))
    }

    /// Directory at a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            table: RwLock::new(ServerTable::new()),
            loaded: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the whole table from disk, replacing the in-memory copy
    ///
    /// Returns the number of profiles loaded.
    pub async fn reload(&self) -> Result<usize, StorageError> {
        let table = self.read_table().await?;
        let count = table.len();
        *self.table.write() = table;
        self.loaded.store(true, Ordering::SeqCst);
        info!("Loaded {} server profiles from {:?}", count, self.path);
        Ok(count)
    }

    async fn ensure_loaded(&self) {
        if self.loaded.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.reload().await {
            // Retried on the next lookup
            error!("Failed to load server directory {:?}: {}", self.path, e);
        }
    }

    /// Missing file yields an empty table; a corrupted file (bad JSON or not
    /// UTF-8 at all) is backed up and treated as empty.
    async fn read_table(&self) -> Result<ServerTable, StorageError> {
        match fs::read(&self.path).await {
            Ok(contents) => match serde_json::from_slice::<ServerTable>(&contents) {
                Ok(table) => Ok(table),
                Err(e) => {
                    warn!("Server directory corrupted: {}", e);
                    match self.backup().await {
                        Ok(backup_path) => warn!(
                            "Corrupted server directory backed up to {:?}, starting empty",
                            backup_path
                        ),
                        Err(backup_err) => {
                            error!("Failed to backup corrupted directory: {}", backup_err)
                        }
                    }
                    Ok(ServerTable::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerTable::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write to a temp file first, then rename (atomic write)
    async fn save(&self, table: &ServerTable) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(table)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        fs::copy(&self.path, &backup_path).await?;
        Ok(backup_path)
    }
}

#[async_trait]
impl ServerDirectory for JsonServerDirectory {
    async fn get(&self, user_id: UserId) -> Option<ServerProfile> {
        self.ensure_loaded().await;
        self.table.read().get(&user_id).cloned()
    }

    async fn put(&self, user_id: UserId, profile: ServerProfile) -> Result<(), StorageError> {
        self.ensure_loaded().await;

        // Saving now would replace every profile we failed to read
        if !self.loaded.load(Ordering::SeqCst) {
            self.table.write().insert(user_id, profile);
            warn!("Not persisting profile of user {}: directory was never loaded", user_id);
            return Err(StorageError::NotLoaded(self.path.clone()));
        }

        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut table = self.table.write();
            table.insert(user_id, profile);
            table.clone()
        };
        debug!("Persisting {} server profiles", snapshot.len());
        self.save(&snapshot).await
    }
}
