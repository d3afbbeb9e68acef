//! Session management
//!
//! Per-user session records, the connection pool built on them, the idle
//! reaper, the console-mode state machine and server registration.

pub mod console;
pub mod pool;
pub mod reaper;
pub mod registration;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use console::{ConsoleModeFsm, ConsoleState};
pub use pool::{ConnectionError, ConnectionPool};
pub use reaper::{IdleReaper, ReapEvent};
pub use registration::{Registrar, RegistrationError};
pub use registry::SessionRegistry;
pub use types::{format_duration, PooledConnection, Session, SessionStatus};
