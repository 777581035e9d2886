//! Tracing/logging setup shared by the engine binary and embedders.

/// Tracing configuration (filters, output formats).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize process-wide structured (JSON) logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize human-readable logging (interactive CLI use).
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}
