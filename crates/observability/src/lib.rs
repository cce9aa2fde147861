//! Process-wide logging setup shared by the stockhold binaries.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize tracing with the format picked from `STOCKHOLD_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
