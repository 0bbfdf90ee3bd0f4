//! Hub tuning knobs.

use std::time::Duration;

use crate::heartbeat::HeartbeatConfig;

/// Default pause between heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Default wait for a pong after each ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on a single write or close to a peer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time after sending during which a message may be edited.
pub const DEFAULT_MAX_EDIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Hub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Sleep between the end of one heartbeat cycle and the next ping.
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered before eviction.
    pub pong_timeout: Duration,
    /// Edits are allowed while the message is at most this old.
    pub max_edit_window: Duration,
    /// A push that has not completed by then counts as a failed send.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            max_edit_window: DEFAULT_MAX_EDIT_WINDOW,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl HubConfig {
    /// Heartbeat settings applied to newly admitted connections.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat_interval,
            timeout: self.pong_timeout,
        }
    }
}
