//! Configuration Management Module
//!
//! Runtime settings, the persisted per-user server table, and the
//! registration input rules.

pub mod settings;
pub mod storage;
pub mod types;
pub mod validation;

pub use settings::{Settings, SettingsError, MAX_MESSAGE_LIMIT};
pub use storage::{config_dir, servers_file, JsonServerDirectory, ServerDirectory, StorageError};
pub use types::{ServerProfile, ServerTable, UserId};
pub use validation::{parse_registration, ValidationError};
