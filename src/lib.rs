//! ShellBridge - per-user SSH sessions for a chat bot
//!
//! Each chat user registers one server and runs commands on it over a
//! long-lived, pooled SSH connection. Idle connections are reclaimed in the
//! background; full-screen programs get a pseudo-terminal with streamed output.

pub mod bridge;
pub mod config;
pub mod router;
pub mod session;
pub mod ssh;

pub use bridge::{BridgeError, ShellBridge};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `default_directive`. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init_logging(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
