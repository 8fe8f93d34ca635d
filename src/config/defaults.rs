//! System-wide default constants.
//!
//! Grouped by subsystem. Every value here can be overridden from
//! `fbg_config.toml` unless noted otherwise.

// ============================================================================
// Instrument
// ============================================================================

/// Interrogator address on the lab network.
pub const INSTRUMENT_HOST: &str = crate::protocol::DEFAULT_HOST;

/// TCP connect timeout (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Idle time after which the streaming socket counts as drained (ms).
pub const DRAIN_IDLE_MS: u64 = 100;

/// Streaming divider choices offered to operators.
pub const DIVIDER_OPTIONS: [u32; 3] = [1, 10, 100];

/// TCP keepalive idle time before the first probe (seconds). Not configurable.
pub const KEEPALIVE_TIME_SECS: u64 = 30;

/// TCP keepalive probe interval (seconds). Not configurable.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Storage
// ============================================================================

/// Directory holding the database, the lock file and the status artifact.
pub const DATA_DIR: &str = "./data";

/// Database directory name inside the data directory.
pub const DATABASE_NAME: &str = "fbg.db";

/// Status artifact file name inside the data directory.
pub const STATUS_FILE_NAME: &str = "status.json";

// ============================================================================
// Recording
// ============================================================================

/// Time covered by one persisted batch (seconds).
///
/// At 1 kHz this is a 100-row batch.
pub const FLUSH_INTERVAL_SECS: f64 = 0.1;

/// Writer queue poll timeout (ms).
pub const DEQUEUE_TIMEOUT_MS: u64 = 100;
