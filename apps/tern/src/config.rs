use std::env;
use std::time::Duration;
#[cfg(test)]
use std::sync::Mutex;

/// Warn when a serialized outbound message crosses this size.
pub const WARN_SEND_SIZE: usize = 1024 * 1024; // 1MB
/// Hard limit: messages larger than this are dropped, not sent.
pub const MAX_SEND_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// A connection open for this long counts as fully recovered and
/// resets the reconnect attempt counter.
pub const STABLE_CONN_TIME: Duration = Duration::from_secs(2);
/// Unsolicited liveness pings are sent at this cadence while open.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Reconnect backoff table, indexed by attempt number (seconds).
/// Attempts past the end of the table use the last entry.
pub const RECONNECT_BACKOFF_SECS: [u64; 8] = [0, 0, 2, 5, 10, 10, 30, 60];
/// Give up reconnecting after this many attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 50;
/// If the previous dial started less than this long ago, force a 1s
/// retry instead of the table delay (flapping-link storm guard).
pub const RECONNECT_STORM_WINDOW: Duration = Duration::from_millis(500);

/// Coalescer: flush immediately once this many chunks are buffered.
pub const MAX_BATCH_CHUNKS: usize = 100;
/// Coalescer: flush immediately once this many bytes are buffered.
pub const MAX_BATCH_BYTES: usize = 128 * 1024;
/// Coalescer: max renderer writes in flight before deferring flushes.
pub const MAX_PENDING_WRITES: usize = 3;
/// Display refresh interval the scheduled flush aligns to.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Window after compositionend during which echoed input identical to
/// the composed text is deduplicated.
pub const IME_DEDUP_WINDOW: Duration = Duration::from_millis(30);
/// Paste guard stays armed this long after the paste completes.
pub const PASTE_GUARD_LINGER: Duration = Duration::from_millis(30);

/// Minimum bytes processed since the last snapshot before another one
/// is worth taking.
pub const MIN_BYTES_FOR_SNAPSHOT: u64 = 100 * 1024;
/// Skip snapshotting while output arrived within this window.
pub const SNAPSHOT_ACTIVE_WINDOW: Duration = Duration::from_secs(2);
/// Idle snapshot check interval, normal and high-throughput.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);
pub const SNAPSHOT_INTERVAL_BUSY: Duration = Duration::from_secs(15);
/// Defer resize RPCs while output arrived within this window.
pub const RESIZE_DEFER_WINDOW: Duration = Duration::from_millis(500);

/// Tern client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend websocket endpoint (defaults to localhost)
    pub endpoint: String,
    /// Auth key sent in the X-AuthKey header, if any
    pub auth_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let endpoint = env::var("TERN_ENDPOINT")
            .unwrap_or_else(|_| "ws://127.0.0.1:8190".to_string());
        let auth_key = env::var("TERN_AUTH_KEY").ok();
        Self { endpoint, auth_key }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8190".to_string(),
            auth_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    // Environment variable tests must not run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8190");
        assert!(config.auth_key.is_none());
    }

    #[test]
    fn config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = env::var("TERN_ENDPOINT").ok();
        unsafe {
            env::set_var("TERN_ENDPOINT", "wss://terminal.example.com");
        }
        let config = Config::from_env();
        assert_eq!(config.endpoint, "wss://terminal.example.com");
        unsafe {
            match original {
                Some(orig) => env::set_var("TERN_ENDPOINT", orig),
                None => env::remove_var("TERN_ENDPOINT"),
            }
        }
    }
}
