//! Version and protocol-identification constants.

/// Crate version of the daemon, surfaced in logs at startup.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// TCP port the daemon listens on by default.
///
/// Fixed by the wire protocol rather than configurable: clients hardcode
/// 9113, so changing it would be a breaking protocol change, not a runtime
/// option.
pub const DEFAULT_PORT: u16 = 9113;

/// Maximum frame payload size accepted from a client, in bytes.
pub const MAX_PAYLOAD_BYTES: u32 = 8 * 1024 * 1024;

/// File size threshold above which `START_UPLOAD` pre-allocates the
/// destination file before accepting chunks.
pub const PREALLOCATE_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
