//! Session, storage, and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session mode and watcher timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Own the connection (keepalive, reconnect, account snapshots).
    pub standalone: bool,
    /// Interval between keepalive pings.
    pub keepalive_interval_ms: u64,
    /// Delay between a close notification and the reconnect.
    pub reconnect_delay_ms: u64,
    /// Fallback poll interval for login-id changes made outside the process.
    pub login_poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            standalone: true,
            keepalive_interval_ms: 10_000,
            reconnect_delay_ms: 500,
            login_poll_interval_ms: 500,
        }
    }
}

impl SessionSettings {
    /// Keepalive interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Login-id poll interval.
    pub fn login_poll_interval(&self) -> Duration {
        Duration::from_millis(self.login_poll_interval_ms)
    }
}

/// Local key-value store location.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Store file; `~/.copydesk/store.json` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
