// ── Runtime sync configuration ──
//
// These types describe *how* the engine schedules refreshes and *which*
// devices it tracks. They never touch disk: the CLI (via rulesync-config)
// constructs them and hands them in.

use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;

/// Base scheduling priority of a device.
pub const DEVICE_PRIORITY: i64 = 50;

/// Base scheduling priority of a rule.
pub const RULE_PRIORITY: i64 = 30;

/// Extra priority for items someone is currently looking at.
pub const VIEW_BONUS: i64 = 40;

/// Capability a device must report before its rules can be edited.
pub const SCRIPTING_CAPABILITY: &str = "scripting";

/// Scheduler tuning shared by every device a controller owns.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sleep when a device's queue is empty.
    pub idle_interval: Duration,
    /// Pause after each refresh before the item is re-queued.
    pub refresh_delay: Duration,
    /// How long removal waits for a device's updater to exit.
    pub stop_timeout: Duration,
    /// Start each device's updater as soon as the device is added.
    /// One-shot consumers turn this off and call `refresh` themselves.
    pub start_updaters: bool,
    /// Bonus applied to viewed items.
    pub view_bonus: i64,
    /// Capability name that marks a device as able to host rules.
    pub scripting_capability: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(500),
            refresh_delay: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(2),
            start_updaters: true,
            view_bonus: VIEW_BONUS,
            scripting_capability: SCRIPTING_CAPABILITY.into(),
        }
    }
}

/// Identity of a device: its admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceKey {
    pub host: String,
    pub port: u16,
}

impl DeviceKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything needed to start tracking a device.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Absent until the user supplies one; the device then waits.
    pub password: Option<SecretString>,
    /// `false` creates the device in the disconnected state.
    pub online: bool,
}

impl DeviceSpec {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            online: true,
        }
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.host.clone(), self.port)
    }
}
