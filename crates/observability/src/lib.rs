//! Tracing and logging setup shared by every tillpoint process.

/// Initialize process-wide tracing in the given output format.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

pub mod tracing;

pub use tracing::{LogFormat, UnknownLogFormat};
