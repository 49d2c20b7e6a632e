//! Tracing and logging setup shared by meshsync binaries.

pub mod subscriber;

pub use subscriber::{LogConfig, LogFormat};

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(&LogConfig::from_env());
}
